use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::protocol::{Band, EncoderCommand, EncoderEvent};
use super::worker::{run_worker, WavCodec};
use crate::error::{RecorderError, Result};

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

/// Session-side handle to one isolated encoder process.
///
/// The process is reachable only through its two queues: commands are FIFO
/// and never block the sender, events arrive in the order the process emits
/// them. Dropping the handle closes the command queue, which ends the process.
#[derive(Debug)]
pub struct EncoderProcess {
    id: u64,
    commands: mpsc::UnboundedSender<EncoderCommand>,
    events: mpsc::UnboundedReceiver<EncoderEvent>,
}

/// Process-side ends of the two queues
#[derive(Debug)]
pub struct EncoderEndpoint {
    pub commands: mpsc::UnboundedReceiver<EncoderCommand>,
    pub events: mpsc::UnboundedSender<EncoderEvent>,
}

impl EncoderProcess {
    /// Create a connected handle/endpoint pair
    pub fn pair() -> (EncoderProcess, EncoderEndpoint) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            EncoderProcess {
                id: NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed),
                commands: command_tx,
                events: event_rx,
            },
            EncoderEndpoint {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a command. Returns `false` if the process has gone away.
    pub fn send(&self, command: EncoderCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Clone of the command queue, for fire-and-forget senders
    pub fn command_sender(&self) -> mpsc::UnboundedSender<EncoderCommand> {
        self.commands.clone()
    }

    /// Next event; `None` once the process has exited
    pub async fn recv(&mut self) -> Option<EncoderEvent> {
        self.events.recv().await
    }

    /// Give up the command side and keep only the event queue
    pub fn into_events(self) -> mpsc::UnboundedReceiver<EncoderEvent> {
        self.events
    }

    /// Discard events left over from a previous session
    pub fn drain_stale(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(event) = self.events.try_recv() {
            debug!("Discarding stale encoder event: {:?}", event);
            drained += 1;
        }
        drained
    }
}

/// Spawns encoder processes for the session
pub trait EncoderFactory: Send + Sync {
    /// Whether the runtime needed to execute encoder processes is present
    fn is_available(&self) -> bool {
        true
    }

    fn spawn(&self, band: Band) -> Result<EncoderProcess>;

    /// Get factory name for logging
    fn name(&self) -> &str;
}

/// Runs the reference WAV encoder as a task on the current tokio runtime
#[derive(Debug, Default)]
pub struct TaskEncoderFactory;

impl EncoderFactory for TaskEncoderFactory {
    fn is_available(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    fn spawn(&self, band: Band) -> Result<EncoderProcess> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| RecorderError::EncoderInit {
            band,
            reason: format!("no async runtime: {}", e),
        })?;

        let (process, endpoint) = EncoderProcess::pair();
        info!("Spawning {} encoder task #{}", band, process.id());
        runtime.spawn(run_worker(band, Box::new(WavCodec::default()), endpoint));
        Ok(process)
    }

    fn name(&self) -> &str {
        "in-process WAV encoder"
    }
}
