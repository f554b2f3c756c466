//! Encoder processes isolated in child processes
//!
//! The child speaks the encoder protocol as JSON lines: one command per line
//! on stdin, one event per line on stdout. `loqa-recorder encoder-worker`
//! is such a child; [`run_stdio_worker`] is its body.

use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::process::{EncoderFactory, EncoderProcess};
use super::protocol::{self, Band, EncoderCommand, EncoderEvent};
use super::worker::{run_worker, WavCodec};
use crate::error::{RecorderError, Result};

/// Spawns `program args... --band <band>` per encoder process
#[derive(Debug, Clone)]
pub struct SubprocessEncoderFactory {
    program: String,
    args: Vec<String>,
}

impl SubprocessEncoderFactory {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl EncoderFactory for SubprocessEncoderFactory {
    fn is_available(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    fn spawn(&self, band: Band) -> Result<EncoderProcess> {
        let band_arg = match band {
            Band::Wide => "wide",
            Band::Voice => "voice",
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(["--band", band_arg])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::EncoderInit {
                band,
                reason: format!("failed to spawn {}: {}", self.program, e),
            })?;

        let missing_pipe = || RecorderError::EncoderInit {
            band,
            reason: "child stdio not captured".into(),
        };
        let mut stdin = child.stdin.take().ok_or_else(missing_pipe)?;
        let stdout = child.stdout.take().ok_or_else(missing_pipe)?;

        let (process, endpoint) = EncoderProcess::pair();
        let mut commands = endpoint.commands;
        let events = endpoint.events;
        info!(
            "Spawned {} encoder child (pid {:?}) as process #{}",
            band,
            child.id(),
            process.id()
        );

        // Commands → child stdin. Ends when the session drops the handle or the
        // child stops reading; dropping stdin then lets the child exit.
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                let line = match protocol::to_line(&command) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Failed to serialize {} command: {}", command.name(), e);
                        continue;
                    }
                };
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    warn!("{} encoder stdin closed: {}", band, e);
                    break;
                }
            }
            let _ = stdin.shutdown().await;
        });

        // Child stdout → events. Ends at EOF, which the channel sees as the
        // process exiting.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match protocol::from_line::<EncoderEvent>(&line) {
                        Ok(event) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Unparseable {} encoder event: {}", band, e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("{} encoder stdout error: {}", band, e);
                        break;
                    }
                }
            }
            match child.wait().await {
                Ok(status) => debug!("{} encoder child exited: {}", band, status),
                Err(e) => warn!("Failed to reap {} encoder child: {}", band, e),
            }
        });

        Ok(process)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Serve the encoder protocol on this process's stdin/stdout
pub async fn run_stdio_worker(band: Band) -> anyhow::Result<()> {
    let (process, endpoint) = EncoderProcess::pair();
    let worker = tokio::spawn(run_worker(band, Box::new(WavCodec::default()), endpoint));

    let commands = process.command_sender();
    let mut events = process.into_events();

    // Stdin EOF drops the last command sender, which ends the worker.
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match protocol::from_line::<EncoderCommand>(&line) {
                Ok(command) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring unparseable command: {}", e),
            }
        }
        anyhow::Ok(())
    });

    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        stdout.write_all(protocol::to_line(&event)?.as_bytes()).await?;
        stdout.flush().await?;
    }

    reader.abort();
    let _ = worker.await;
    debug!("{} stdio worker done", band);
    Ok(())
}
