use thiserror::Error;

use crate::encoder::Band;

/// Errors surfaced by the recorder's public API.
///
/// Protocol violations (an `encode` for a channel that is not ready) are not
/// represented here: they are logged and dropped at the channel boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("recording is not supported in this environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("audio device acquisition failed: {0}")]
    DeviceAcquisition(String),

    #[error("{band} encoder failed to initialize: {reason}")]
    EncoderInit { band: Band, reason: String },

    #[error("{band} encoder terminated before delivering its buffer")]
    EncoderTerminated { band: Band },

    #[error("invalid recorder configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RecorderError>;
