use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Recorder session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    Inactive = 0,
    Recording = 1,
    Paused = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Recording,
            2 => SessionState::Paused,
            _ => SessionState::Inactive,
        }
    }

    /// Whether captured blocks are forwarded to the encoders
    pub fn is_forwarding(self) -> bool {
        self == SessionState::Recording
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Inactive => f.write_str("inactive"),
            SessionState::Recording => f.write_str("recording"),
            SessionState::Paused => f.write_str("paused"),
        }
    }
}

/// Public API operations that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Stop,
}

/// State after `transition`, or `None` when the call is a no-op from `state`
pub fn next(state: SessionState, transition: Transition) -> Option<SessionState> {
    use SessionState::*;
    use Transition::*;

    match (state, transition) {
        (Inactive, Start) => Some(Recording),
        (Recording, Pause) => Some(Paused),
        (Paused, Resume) => Some(Recording),
        (Recording | Paused, Stop) => Some(Inactive),
        _ => None,
    }
}

/// Session state shared with the capture path
#[derive(Debug, Clone)]
pub struct SharedSessionState(Arc<AtomicU8>);

impl SharedSessionState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SessionState::Inactive as u8)))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for SharedSessionState {
    fn default() -> Self {
        Self::new()
    }
}
