use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBlock, BlockSink, CaptureFormat};
use crate::error::{RecorderError, Result as RecorderResult};

/// A fully decoded audio file (interleaved f32 samples)
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unsupported audio format")?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No decodable audio track")?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .context("Audio track has no sample rate")?;
        let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create decoder")?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e).context("Failed to decode audio packet"),
            };

            let spec = *decoded.spec();
            channels = spec.channels.count() as u16;
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        let channels = channels.max(1);
        let duration_seconds = samples.len() as f64 / (sample_rate as f64 * channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }

    /// Split into blocks of `block_length` frames with exactly `channel_count`
    /// channels. Missing channels repeat the last decoded one; the final block
    /// is padded with silence.
    pub fn blocks(&self, block_length: usize, channel_count: u16) -> Vec<AudioBlock> {
        let block = AudioBlock::from_interleaved(&self.samples, self.channels, self.sample_rate);
        let source_channels = block.channels();
        let frames = block.frames();
        let wanted = channel_count.max(1) as usize;
        let block_length = block_length.max(1);

        (0..frames)
            .step_by(block_length)
            .map(|start| {
                let end = (start + block_length).min(frames);
                let planes = (0..wanted)
                    .map(|c| {
                        let source = &source_channels[c.min(source_channels.len() - 1)];
                        let mut plane = source[start..end].to_vec();
                        plane.resize(block_length, 0.0);
                        plane
                    })
                    .collect();
                AudioBlock::new(planes, self.sample_rate)
            })
            .collect()
    }
}

/// Replays a decoded file as capture blocks.
///
/// With `realtime` set, blocks are paced at the rate a live device would
/// deliver them; otherwise they are delivered as fast as the sink accepts them.
pub struct FileBackend {
    blocks: Arc<Vec<AudioBlock>>,
    format: CaptureFormat,
    realtime: bool,
    capturing: Arc<AtomicBool>,
    drained_tx: Arc<watch::Sender<bool>>,
    start_signal: Option<watch::Receiver<bool>>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(file: &AudioFile, block_length: usize, channel_count: u16, realtime: bool) -> Self {
        let (drained_tx, _) = watch::channel(false);
        Self {
            blocks: Arc::new(file.blocks(block_length, channel_count)),
            format: CaptureFormat {
                sample_rate: file.sample_rate,
                channels: channel_count.max(1),
            },
            realtime,
            capturing: Arc::new(AtomicBool::new(false)),
            drained_tx: Arc::new(drained_tx),
            start_signal: None,
            task: None,
        }
    }

    /// Hold playback until `signal` turns `true`, so no block is delivered
    /// before the consumer is ready for it.
    pub fn start_when(mut self, signal: watch::Receiver<bool>) -> Self {
        self.start_signal = Some(signal);
        self
    }

    /// Receiver that flips to `true` once every block has been delivered
    pub fn drained(&self) -> watch::Receiver<bool> {
        self.drained_tx.subscribe()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self, sink: BlockSink) -> RecorderResult<CaptureFormat> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(RecorderError::DeviceAcquisition("file backend already capturing".into()));
        }
        if self.blocks.is_empty() {
            return Err(RecorderError::DeviceAcquisition("audio file contains no samples".into()));
        }

        self.capturing.store(true, Ordering::SeqCst);
        self.drained_tx.send_replace(false);

        let blocks = Arc::clone(&self.blocks);
        let capturing = Arc::clone(&self.capturing);
        let drained_tx = Arc::clone(&self.drained_tx);
        let block_period = Duration::from_secs_f64(
            blocks[0].frames() as f64 / self.format.sample_rate as f64,
        );
        let realtime = self.realtime;
        let start_signal = self.start_signal.clone();

        self.task = Some(tokio::spawn(async move {
            if let Some(mut signal) = start_signal {
                if signal.wait_for(|ready| *ready).await.is_err() {
                    debug!("Start signal dropped before playback");
                    return;
                }
            }
            let mut ticker = tokio::time::interval(block_period);
            for (index, block) in blocks.iter().enumerate() {
                if realtime {
                    ticker.tick().await;
                } else {
                    tokio::task::yield_now().await;
                }
                if !capturing.load(Ordering::SeqCst) {
                    debug!("File playback stopped at block {}", index);
                    return;
                }
                sink(block);
            }
            debug!("File playback delivered {} blocks", blocks.len());
            drained_tx.send_replace(true);
        }));

        info!(
            "File backend started ({}Hz, {} channels, {} blocks)",
            self.format.sample_rate,
            self.format.channels,
            self.blocks.len()
        );
        Ok(self.format)
    }

    async fn stop(&mut self) -> RecorderResult<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            // Playback may still be waiting on its start signal.
            task.abort();
            match task.await {
                Err(e) if !e.is_cancelled() => warn!("File playback task ended abnormally: {}", e),
                _ => {}
            }
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "audio file"
    }
}
