//! Recording session management
//!
//! This module provides the `SessionController` that manages:
//! - Capture acquisition and the gain routing graph
//! - Block dispatch to the wide-band and voice-band encoders
//! - The Inactive / Recording / Paused state machine
//! - Joining both encoder completions into one stop callback

mod completion;
mod config;
mod controller;
mod delegate;
mod dispatch;
mod state;
mod stats;

pub use completion::CompletionGate;
pub use config::RecorderConfig;
pub use controller::SessionController;
pub use delegate::{MemoryVolumeStore, NoopDelegate, RecorderDelegate, VolumeStore};
pub use dispatch::{BlockDispatcher, DispatchCounters};
pub use state::{next as next_state, SessionState, SharedSessionState, Transition};
pub use stats::SessionStats;
