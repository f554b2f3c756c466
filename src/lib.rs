pub mod audio;
pub mod config;
pub mod encoder;
pub mod error;
pub mod session;

pub use audio::{AudioBackend, AudioBlock, AudioFile, CaptureFormat, FileBackend, PushSource};
pub use config::Config;
pub use encoder::{Band, EncoderFactory, SubprocessEncoderFactory, TaskEncoderFactory};
pub use error::{RecorderError, Result};
pub use session::{
    MemoryVolumeStore, RecorderConfig, RecorderDelegate, SessionController, SessionState,
    SessionStats, VolumeStore,
};
