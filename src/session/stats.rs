use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Snapshot of a recorder's activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Id of the current or most recent session
    pub session_id: Option<String>,

    pub state: SessionState,

    /// When the current or most recent session started
    pub started_at: Option<DateTime<Utc>>,

    /// Recorded audio in seconds (paused time excluded)
    pub duration_secs: f64,

    /// Blocks sent to the encoders this session
    pub blocks_forwarded: u64,

    /// Blocks rejected or captured while not recording
    pub blocks_dropped: u64,

    /// Sessions whose stop callback has fired
    pub completed_sessions: u64,

    /// Encoder processes spawned over the recorder's lifetime
    pub encoder_processes_spawned: usize,
}
