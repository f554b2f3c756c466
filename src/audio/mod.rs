pub mod backend;
pub mod file;
pub mod resample;
pub mod routing;

pub use backend::{AudioBackend, AudioBlock, BlockSink, CaptureFormat, PushHandle, PushSource};
pub use file::{AudioFile, FileBackend};
pub use resample::Resampler;
pub use routing::{AudioRouting, MonitorSink, SmoothedGain};
