use parking_lot::Mutex;

/// Receives session lifecycle callbacks and finished buffers.
///
/// Every method defaults to a no-op. Callbacks run on the task driving the
/// controller and must not block.
pub trait RecorderDelegate: Send + Sync {
    fn on_start(&self) {}

    fn on_pause(&self) {}

    fn on_resume(&self) {}

    /// Fires once per session, after both bands delivered their buffers
    fn on_stop(&self) {}

    /// Wide-band buffer and the recorded duration in seconds
    fn on_wide_band_data(&self, _buffer: Vec<u8>, _duration_secs: f64) {}

    fn on_voice_band_data(&self, _buffer: Vec<u8>) {}
}

/// Delegate that ignores everything
#[derive(Debug, Default)]
pub struct NoopDelegate;

impl RecorderDelegate for NoopDelegate {}

/// Persists the recording volume between sessions
pub trait VolumeStore: Send + Sync {
    fn load(&self) -> Option<f32>;

    fn save(&self, gain: f32);
}

/// Volume store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryVolumeStore {
    gain: Mutex<Option<f32>>,
}

impl MemoryVolumeStore {
    pub fn with_gain(gain: f32) -> Self {
        Self {
            gain: Mutex::new(Some(gain)),
        }
    }
}

impl VolumeStore for MemoryVolumeStore {
    fn load(&self) -> Option<f32> {
        *self.gain.lock()
    }

    fn save(&self, gain: f32) {
        *self.gain.lock() = Some(gain);
    }
}
