use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RecorderError, Result};

/// Configuration for a recording session
///
/// Block length and channel count are fixed for the lifetime of a session.
/// Only the two gain fields change after construction, through the volume API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Frames per channel in each captured block
    pub block_length: usize,

    /// Number of captured channels (only channel 0 is encoded)
    pub channel_count: u16,

    /// Monitor (playback) gain applied to the routed copy of the input
    pub monitor_gain: f32,

    /// Recording gain; `None` falls back to the persisted volume
    pub recording_gain: Option<f32>,

    /// Preferred wide-band encode sample rate
    pub encode_sample_rate: u32,

    /// Sample rate the voice-band channel receives (resampled)
    pub voice_target_rate: u32,

    /// Resampler quality, 0 (linear) to 4 (widest kernel)
    pub resample_quality: u8,

    /// Voice codec application id passed through `init`
    pub encoder_application: u32,

    /// Voice codec frame size in milliseconds
    pub encoder_frame_size: u32,

    /// Maximum codec frames per container page
    pub max_frames_per_page: u32,

    /// Flush encoded pages incrementally instead of only at finish
    pub stream_pages: bool,

    /// Keep encoder processes alive between sessions
    pub reuse_encoder_process: bool,

    /// Output bit depth, sent to encoders as `bitRate`
    pub output_bit_depth: u16,

    /// How long `start()` waits for each encoder's ready ack
    pub encoder_init_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            block_length: 4096,
            channel_count: 1,
            monitor_gain: 0.0,
            recording_gain: None,
            encode_sample_rate: 48000,
            voice_target_rate: 16000,
            resample_quality: 3,
            encoder_application: 2049,
            encoder_frame_size: 20,
            max_frames_per_page: 40,
            stream_pages: false,
            reuse_encoder_process: false,
            output_bit_depth: 16,
            encoder_init_timeout_ms: 5000,
        }
    }
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_length == 0 {
            return Err(RecorderError::Config("block length must be positive".into()));
        }
        if !(1..=8).contains(&self.channel_count) {
            return Err(RecorderError::Config(format!(
                "unsupported channel count: {}",
                self.channel_count
            )));
        }
        if self.resample_quality > 4 {
            return Err(RecorderError::Config(format!(
                "resample quality must be 0-4, got {}",
                self.resample_quality
            )));
        }
        if ![8, 16, 24, 32].contains(&self.output_bit_depth) {
            return Err(RecorderError::Config(format!(
                "unsupported bit depth: {}",
                self.output_bit_depth
            )));
        }
        if self.encode_sample_rate == 0 || self.voice_target_rate == 0 {
            return Err(RecorderError::Config("sample rates must be positive".into()));
        }
        Ok(())
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_init_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_recorder_contract() {
        let config = RecorderConfig::default();
        assert_eq!(config.block_length, 4096);
        assert_eq!(config.channel_count, 1);
        assert_eq!(config.encode_sample_rate, 48000);
        assert_eq!(config.voice_target_rate, 16000);
        assert_eq!(config.resample_quality, 3);
        assert_eq!(config.max_frames_per_page, 40);
        assert!(!config.stream_pages);
        assert!(!config.reuse_encoder_process);
        assert_eq!(config.output_bit_depth, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let bad_quality = RecorderConfig {
            resample_quality: 5,
            ..Default::default()
        };
        assert!(bad_quality.validate().is_err());

        let bad_block = RecorderConfig {
            block_length: 0,
            ..Default::default()
        };
        assert!(bad_block.validate().is_err());

        let bad_depth = RecorderConfig {
            output_bit_depth: 12,
            ..Default::default()
        };
        assert!(bad_depth.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RecorderConfig =
            serde_json::from_str(r#"{ "block_length": 1024, "stream_pages": true }"#).unwrap();
        assert_eq!(config.block_length, 1024);
        assert!(config.stream_pages);
        assert_eq!(config.channel_count, 1);
        assert_eq!(config.recording_gain, None);
    }
}
