// Gain stages between the capture source and its two destinations
//
//   source ─┬─ recording gain ─→ block dispatcher (encoders)
//           └─ monitor gain ───→ monitor sink (playback)
//
// Gain changes never step: each stage approaches its target exponentially
// with a short time constant, one coefficient per sample.

use std::sync::Arc;
use tracing::debug;

use super::backend::AudioBlock;

/// Time constant for gain changes, in seconds
pub const GAIN_SMOOTHING_SECS: f32 = 0.01;

/// Receives the monitor-gained copy of every captured block
pub type MonitorSink = Arc<dyn Fn(&AudioBlock) + Send + Sync + 'static>;

/// A gain parameter that glides toward its target
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedGain {
    current: f32,
    target: f32,
    coefficient: f32,
}

impl SmoothedGain {
    pub fn new(gain: f32, sample_rate: u32) -> Self {
        let samples = (GAIN_SMOOTHING_SECS * sample_rate.max(1) as f32).max(1.0);
        Self {
            current: gain,
            target: gain,
            coefficient: 1.0 - (-1.0 / samples).exp(),
        }
    }

    pub fn set_target(&mut self, gain: f32) {
        self.target = gain;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Largest fraction of the remaining distance covered in one sample
    pub fn coefficient(&self) -> f32 {
        self.coefficient
    }

    /// Advance one sample and return the gain to apply to it
    pub fn next_gain(&mut self) -> f32 {
        self.current += (self.target - self.current) * self.coefficient;
        if (self.target - self.current).abs() < 1e-6 {
            self.current = self.target;
        }
        self.current
    }

    fn apply(&mut self, block: &AudioBlock) -> AudioBlock {
        if self.current == self.target {
            let gain = self.target;
            return block.map_samples(|_, s| s * gain);
        }
        // Same gain curve for every channel of the block.
        let curve: Vec<f32> = (0..block.frames()).map(|_| self.next_gain()).collect();
        block.map_samples(|i, s| s * curve[i])
    }
}

/// The recorder's live routing graph.
///
/// Exists from `start()` until `stop()` disconnects it.
pub struct AudioRouting {
    recording: SmoothedGain,
    monitor: SmoothedGain,
    monitor_sink: Option<MonitorSink>,
}

impl AudioRouting {
    pub fn new(
        recording_gain: f32,
        monitor_gain: f32,
        sample_rate: u32,
        monitor_sink: Option<MonitorSink>,
    ) -> Self {
        debug!(
            "Routing connected: recording gain {:.2}, monitor gain {:.2}",
            recording_gain, monitor_gain
        );
        Self {
            recording: SmoothedGain::new(recording_gain, sample_rate),
            monitor: SmoothedGain::new(monitor_gain, sample_rate),
            monitor_sink,
        }
    }

    pub fn set_recording_gain(&mut self, gain: f32) {
        self.recording.set_target(gain);
    }

    pub fn set_monitor_gain(&mut self, gain: f32) {
        self.monitor.set_target(gain);
    }

    pub fn recording_gain(&self) -> &SmoothedGain {
        &self.recording
    }

    pub fn monitor_gain(&self) -> &SmoothedGain {
        &self.monitor
    }

    /// Feed the monitor sink and return the block bound for the encoders
    pub fn route(&mut self, block: &AudioBlock) -> AudioBlock {
        if let Some(sink) = &self.monitor_sink {
            let silent = self.monitor.current() == 0.0 && self.monitor.target() == 0.0;
            if !silent {
                sink(&self.monitor.apply(block));
            }
        }
        self.recording.apply(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gain_change_is_slew_limited() {
        let mut gain = SmoothedGain::new(1.0, 48000);
        gain.set_target(0.0);

        let first = gain.next_gain();
        assert!(first > 0.9, "first sample must not jump to the target: {first}");

        let mut previous = first;
        for _ in 0..480 {
            let next = gain.next_gain();
            assert!((previous - next).abs() <= gain.coefficient() + 1e-6);
            previous = next;
        }
        // Five time constants later the gain has settled within 1%.
        for _ in 0..1920 {
            gain.next_gain();
        }
        assert!(gain.current() < 0.01);
        assert_eq!(gain.target(), 0.0);
    }

    #[test]
    fn test_steady_gain_scales_block() {
        let mut routing = AudioRouting::new(0.5, 0.0, 16000, None);
        let block = AudioBlock::new(vec![vec![1.0, -1.0, 0.5]], 16000);
        let routed = routing.route(&block);
        assert_eq!(routed.channel(0), Some(&[0.5, -0.5, 0.25][..]));
    }

    #[test]
    fn test_monitor_sink_receives_gained_copy() {
        use parking_lot::Mutex;

        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink_store = Arc::clone(&captured);
        let sink: MonitorSink = Arc::new(move |block: &AudioBlock| {
            sink_store.lock().extend_from_slice(block.channel(0).unwrap());
        });

        let mut routing = AudioRouting::new(1.0, 0.25, 16000, Some(sink));
        let routed = routing.route(&AudioBlock::new(vec![vec![1.0, 1.0]], 16000));

        assert_eq!(routed.channel(0), Some(&[1.0, 1.0][..]));
        let monitored = captured.lock();
        assert_eq!(monitored.len(), 2);
        assert_relative_eq!(monitored[0], 0.25);
        drop(monitored);

        routing.set_monitor_gain(0.5);
        assert_eq!(routing.monitor_gain().target(), 0.5);
        assert_relative_eq!(routing.monitor_gain().current(), 0.25);
        assert_eq!(routing.recording_gain().target(), 1.0);
    }

    #[test]
    fn test_silent_monitor_skips_sink() {
        let sink: MonitorSink = Arc::new(|_: &AudioBlock| panic!("monitor muted"));
        let mut routing = AudioRouting::new(1.0, 0.0, 16000, Some(sink));
        routing.route(&AudioBlock::silent(8, 1, 16000));
    }
}
