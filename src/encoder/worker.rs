//! Reference encoder worker
//!
//! Speaks the encoder protocol on an [`EncoderEndpoint`]. The worker is the
//! same whether it runs as a tokio task or behind a child process's stdio;
//! only the codec behind it changes.
//!
//! Protocol, per session:
//! 1. `init` configures the codec and is answered with the band's ack
//!    (`ready` for wide-band, `init` for voice-band)
//! 2. `encode` commands feed samples; nothing is sent back
//! 3. `flush` emits any pending output as `process`, then `flushed`
//! 4. `finish` emits the complete buffer as `end` and readies the codec for
//!    another `init`
//! 5. `close` / `destroy` is acknowledged with `destroy` and ends the worker

use std::io::Cursor;
use tracing::{debug, error, info, warn};

use super::process::EncoderEndpoint;
use super::protocol::{Band, EncoderCommand, EncoderEvent, EncoderInit};

/// Codec driven by the worker loop
pub trait Codec: Send {
    fn configure(&mut self, init: &EncoderInit) -> Result<(), String>;

    /// Container header pages, if the format has them
    fn header_pages(&mut self) -> Vec<u8> {
        Vec::new()
    }

    fn encode(&mut self, samples: &[f32]);

    /// Output that can be emitted before finish
    fn flush(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Complete output for the session
    fn finish(&mut self) -> Result<Vec<u8>, String>;
}

/// Mono integer PCM in a WAV container
#[derive(Debug, Default)]
pub struct WavCodec {
    spec: Option<hound::WavSpec>,
    samples: Vec<i32>,
}

impl WavCodec {
    fn quantize(sample: f32, bits: u16) -> i32 {
        let max = ((1i64 << (bits - 1)) - 1) as f32;
        let scaled = (sample.clamp(-1.0, 1.0) * max).round();
        scaled as i32
    }
}

impl Codec for WavCodec {
    fn configure(&mut self, init: &EncoderInit) -> Result<(), String> {
        if init.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if ![8, 16, 24, 32].contains(&init.bit_rate) {
            return Err(format!("unsupported bit depth: {}", init.bit_rate));
        }
        self.spec = Some(hound::WavSpec {
            channels: 1,
            sample_rate: init.sample_rate,
            bits_per_sample: init.bit_rate,
            sample_format: hound::SampleFormat::Int,
        });
        self.samples.clear();
        Ok(())
    }

    fn encode(&mut self, samples: &[f32]) {
        let Some(spec) = self.spec else {
            warn!("Encode before init; dropping {} samples", samples.len());
            return;
        };
        self.samples
            .extend(samples.iter().map(|&s| Self::quantize(s, spec.bits_per_sample)));
    }

    fn finish(&mut self) -> Result<Vec<u8>, String> {
        let spec = self.spec.ok_or("finish before init")?;
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).map_err(|e| e.to_string())?;
            for &sample in &self.samples {
                writer.write_sample(sample).map_err(|e| e.to_string())?;
            }
            writer.finalize().map_err(|e| e.to_string())?;
        }
        self.samples.clear();
        Ok(cursor.into_inner())
    }
}

/// Serve one encoder process until teardown or until the session side hangs up
pub async fn run_worker(band: Band, mut codec: Box<dyn Codec>, endpoint: EncoderEndpoint) {
    let EncoderEndpoint {
        mut commands,
        events,
    } = endpoint;
    let mut encoded_samples = 0usize;

    debug!("{} encoder worker started", band);

    while let Some(command) = commands.recv().await {
        let reply = match command {
            EncoderCommand::Init { config } => match codec.configure(&config) {
                Ok(()) => {
                    info!(
                        "{} encoder configured ({}Hz, {} bit)",
                        band, config.sample_rate, config.bit_rate
                    );
                    encoded_samples = 0;
                    Some(band.ready_event())
                }
                Err(e) => {
                    // Exiting closes the event queue, which the channel reports as an init failure.
                    error!("{} encoder rejected init: {}", band, e);
                    break;
                }
            },
            EncoderCommand::Encode { buf } => {
                encoded_samples += buf.len();
                codec.encode(&buf);
                None
            }
            EncoderCommand::GetHeaderPages => {
                let pages = codec.header_pages();
                (!pages.is_empty()).then_some(EncoderEvent::Process { buf: pages })
            }
            EncoderCommand::Flush => {
                let pending = codec.flush();
                if !pending.is_empty() && events.send(EncoderEvent::Process { buf: pending }).is_err() {
                    break;
                }
                Some(EncoderEvent::Flushed)
            }
            EncoderCommand::Finish => match codec.finish() {
                Ok(buf) => {
                    info!(
                        "{} encoder finished: {} samples -> {} bytes",
                        band,
                        encoded_samples,
                        buf.len()
                    );
                    Some(EncoderEvent::End { buf })
                }
                Err(e) => {
                    error!("{} encoder failed to finish: {}", band, e);
                    break;
                }
            },
            EncoderCommand::Close | EncoderCommand::Destroy => {
                let _ = events.send(EncoderEvent::Destroyed);
                break;
            }
        };

        if let Some(event) = reply {
            if events.send(event).is_err() {
                debug!("{} encoder event queue closed", band);
                break;
            }
        }
    }

    debug!("{} encoder worker stopped", band);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::process::EncoderProcess;

    #[test]
    fn test_wav_codec_writes_pcm16() {
        let mut codec = WavCodec::default();
        codec.configure(&EncoderInit::new(16000, 16)).unwrap();
        codec.encode(&[0.0, 1.0, -1.0]);
        let bytes = codec.finish().unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_wav_codec_rejects_bad_depth() {
        let mut codec = WavCodec::default();
        assert!(codec.configure(&EncoderInit::new(48000, 12)).is_err());
    }

    #[tokio::test]
    async fn test_worker_session_sequence() {
        let (mut process, endpoint) = EncoderProcess::pair();
        tokio::spawn(run_worker(Band::Voice, Box::new(WavCodec::default()), endpoint));

        process.send(EncoderCommand::Init {
            config: EncoderInit::new(16000, 16),
        });
        assert_eq!(process.recv().await, Some(EncoderEvent::InitAck));

        process.send(EncoderCommand::Encode { buf: vec![0.0; 160] });
        process.send(EncoderCommand::Finish);
        process.send(EncoderCommand::Destroy);

        match process.recv().await {
            Some(EncoderEvent::End { buf }) => {
                let reader = hound::WavReader::new(Cursor::new(buf)).unwrap();
                assert_eq!(reader.len(), 160);
            }
            other => panic!("expected end, got {:?}", other),
        }
        assert_eq!(process.recv().await, Some(EncoderEvent::Destroyed));
        assert_eq!(process.recv().await, None);
    }

    #[tokio::test]
    async fn test_worker_exits_on_rejected_init() {
        let (mut process, endpoint) = EncoderProcess::pair();
        tokio::spawn(run_worker(Band::Wide, Box::new(WavCodec::default()), endpoint));

        process.send(EncoderCommand::Init {
            config: EncoderInit::new(0, 16),
        });
        assert_eq!(process.recv().await, None);
    }
}
