use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RecorderError, Result};

/// One fixed-length slice of planar audio delivered per capture tick
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// One sample vector per channel, all the same length
    channels: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBlock {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Split interleaved samples into planar channels. A trailing partial
    /// frame is discarded.
    pub fn from_interleaved(samples: &[f32], channel_count: u16, sample_rate: u32) -> Self {
        let channel_count = channel_count.max(1) as usize;
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    pub fn silent(frames: usize, channel_count: u16, sample_rate: u32) -> Self {
        Self::new(
            vec![vec![0.0; frames]; channel_count.max(1) as usize],
            sample_rate,
        )
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Apply `f` to every sample of every channel, producing a new block
    pub fn map_samples(&self, mut f: impl FnMut(usize, f32) -> f32) -> Self {
        let channels = self
            .channels
            .iter()
            .map(|channel| {
                channel
                    .iter()
                    .enumerate()
                    .map(|(i, &s)| f(i, s))
                    .collect()
            })
            .collect();
        Self::new(channels, self.sample_rate)
    }
}

/// Format of the live capture, known once the device has been acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Callback invoked once per captured block.
///
/// May fire on the backend's own audio thread; keep work minimal and never
/// block on an encoder.
pub type BlockSink = Arc<dyn Fn(&AudioBlock) + Send + Sync + 'static>;

/// Audio capture backend trait
///
/// Implementations:
/// - `FileBackend`: decoded audio file replayed as blocks
/// - `PushSource`: caller-driven capture (external sources, tests)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Whether the capture API this backend needs is present
    fn is_available(&self) -> bool {
        true
    }

    /// Acquire the device and start delivering blocks to `sink`
    async fn start(&mut self, sink: BlockSink) -> Result<CaptureFormat>;

    /// Stop delivering blocks and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Caller-driven capture source.
///
/// The session holds the `PushSource`; the caller keeps the paired
/// [`PushHandle`] and pushes blocks into whatever sink is currently attached.
/// Blocks are delivered synchronously on the caller's thread.
pub struct PushSource {
    format: CaptureFormat,
    shared: Arc<PushShared>,
    fail_next_start: Option<String>,
}

struct PushShared {
    sink: Mutex<Option<BlockSink>>,
    capturing: AtomicBool,
}

#[derive(Clone)]
pub struct PushHandle {
    shared: Arc<PushShared>,
    format: CaptureFormat,
}

impl PushSource {
    pub fn new(sample_rate: u32, channels: u16) -> (Self, PushHandle) {
        let format = CaptureFormat {
            sample_rate,
            channels,
        };
        let shared = Arc::new(PushShared {
            sink: Mutex::new(None),
            capturing: AtomicBool::new(false),
        });
        let handle = PushHandle {
            shared: Arc::clone(&shared),
            format,
        };
        (
            Self {
                format,
                shared,
                fail_next_start: None,
            },
            handle,
        )
    }

    /// Make the next `start()` fail as if the device could not be acquired
    pub fn fail_next_start(&mut self, reason: impl Into<String>) {
        self.fail_next_start = Some(reason.into());
    }
}

#[async_trait::async_trait]
impl AudioBackend for PushSource {
    async fn start(&mut self, sink: BlockSink) -> Result<CaptureFormat> {
        if let Some(reason) = self.fail_next_start.take() {
            return Err(RecorderError::DeviceAcquisition(reason));
        }
        *self.shared.sink.lock() = Some(sink);
        self.shared.capturing.store(true, Ordering::SeqCst);
        Ok(self.format)
    }

    async fn stop(&mut self) -> Result<()> {
        self.shared.capturing.store(false, Ordering::SeqCst);
        self.shared.sink.lock().take();
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "push source"
    }
}

impl PushHandle {
    /// Deliver a block to the attached sink. Returns `false` when no session
    /// is capturing from this source.
    pub fn push(&self, block: &AudioBlock) -> bool {
        let sink = self.shared.sink.lock().clone();
        match sink {
            Some(sink) => {
                sink(block);
                true
            }
            None => false,
        }
    }

    /// Push a block of silence in the source's own format
    pub fn push_silence(&self, frames: usize) -> bool {
        self.push(&AudioBlock::silent(
            frames,
            self.format.channels,
            self.format.sample_rate,
        ))
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_from_interleaved_splits_channels() {
        let block = AudioBlock::from_interleaved(&[1.0, -1.0, 2.0, -2.0, 3.0], 2, 48000);
        assert_eq!(block.channel_count(), 2);
        assert_eq!(block.frames(), 2);
        assert_eq!(block.channel(0), Some(&[1.0, 2.0][..]));
        assert_eq!(block.channel(1), Some(&[-1.0, -2.0][..]));
    }

    #[tokio::test]
    async fn test_push_source_delivers_only_while_started() {
        let (mut source, handle) = PushSource::new(44100, 1);
        assert!(!handle.push_silence(16));

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let format = source
            .start(Arc::new(move |block: &AudioBlock| {
                counter.fetch_add(block.frames(), Ordering::SeqCst);
            }))
            .await
            .unwrap();
        assert_eq!(format.sample_rate, 44100);

        assert!(handle.push_silence(16));
        source.stop().await.unwrap();
        assert!(!handle.push_silence(16));
        assert_eq!(seen.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_push_source_failed_start() {
        let (mut source, handle) = PushSource::new(48000, 1);
        source.fail_next_start("permission denied");
        let result = source.start(Arc::new(|_: &AudioBlock| {})).await;
        assert!(matches!(result, Err(RecorderError::DeviceAcquisition(_))));
        assert!(!handle.is_capturing());
    }
}
