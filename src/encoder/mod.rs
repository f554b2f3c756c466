//! Encoder pipelines
//!
//! Each band is encoded by its own isolated process, reachable only through
//! a command queue and an event queue. [`EncoderChannel`] drives the process
//! lifecycle; the process itself is either a tokio task or a child process
//! speaking the same protocol over stdio.

mod channel;
mod process;
pub mod protocol;
mod subprocess;
mod worker;

pub use channel::{ChannelState, EncoderChannel, EncoderSink};
pub use process::{EncoderEndpoint, EncoderFactory, EncoderProcess, TaskEncoderFactory};
pub use protocol::{Band, EncoderCommand, EncoderEvent, EncoderInit};
pub use subprocess::{run_stdio_worker, SubprocessEncoderFactory};
pub use worker::{run_worker, Codec, WavCodec};
