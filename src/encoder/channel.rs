use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::process::{EncoderFactory, EncoderProcess};
use super::protocol::{Band, EncoderCommand, EncoderEvent, EncoderInit};
use crate::error::{RecorderError, Result};

/// Lifecycle of one encoder channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Finishing = 3,
    Closed = 4,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ChannelState::Initializing,
            2 => ChannelState::Ready,
            3 => ChannelState::Finishing,
            4 => ChannelState::Closed,
            _ => ChannelState::Uninitialized,
        }
    }
}

/// Channel state readable from the capture thread
#[derive(Debug, Clone)]
struct SharedChannelState(Arc<AtomicU8>);

impl SharedChannelState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ChannelState::Uninitialized as u8)))
    }

    fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Fire-and-forget `encode` submitter handed to the block dispatcher
#[derive(Debug, Clone)]
pub struct EncoderSink {
    band: Band,
    state: SharedChannelState,
    commands: mpsc::UnboundedSender<EncoderCommand>,
}

impl EncoderSink {
    /// Queue samples for encoding. Returns `false` when the channel is not
    /// ready; the samples are dropped and the violation logged.
    pub fn encode(&self, samples: Vec<f32>) -> bool {
        let state = self.state.get();
        if state != ChannelState::Ready {
            warn!(
                "Protocol violation: encode sent to {} channel in state {:?}; dropped",
                self.band, state
            );
            return false;
        }
        if self.commands.send(EncoderCommand::Encode { buf: samples }).is_err() {
            warn!("{} encoder process is gone; encode dropped", self.band);
            return false;
        }
        true
    }

    pub fn band(&self) -> Band {
        self.band
    }
}

/// One encoder pipeline: a process plus its lifecycle and message protocol
#[derive(Debug)]
pub struct EncoderChannel {
    band: Band,
    reuse: bool,
    state: SharedChannelState,
    process: Option<EncoderProcess>,
    /// Incremental output received this session
    output: Vec<u8>,
    spawned: usize,
}

impl EncoderChannel {
    pub fn new(band: Band, reuse: bool) -> Self {
        Self {
            band,
            reuse,
            state: SharedChannelState::new(),
            process: None,
            output: Vec::new(),
            spawned: 0,
        }
    }

    pub fn band(&self) -> Band {
        self.band
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// Number of processes this channel has spawned over its lifetime
    pub fn processes_spawned(&self) -> usize {
        self.spawned
    }

    /// Id of the retained process, if any
    pub fn process_id(&self) -> Option<u64> {
        self.process.as_ref().map(EncoderProcess::id)
    }

    /// Sink for the dispatcher; `None` without a live process
    pub fn sink(&self) -> Option<EncoderSink> {
        self.process.as_ref().map(|process| EncoderSink {
            band: self.band,
            state: self.state.clone(),
            commands: process.command_sender(),
        })
    }

    /// Send `init` and wait for the band's ack.
    ///
    /// Spawns a fresh process unless one is retained from a previous session.
    pub async fn init(
        &mut self,
        factory: &dyn EncoderFactory,
        config: EncoderInit,
        timeout: Duration,
    ) -> Result<()> {
        match self.state() {
            ChannelState::Uninitialized | ChannelState::Ready | ChannelState::Closed => {}
            state => {
                return Err(self.init_error(format!("cannot init while {:?}", state)));
            }
        }

        let process = match self.process.take() {
            Some(mut process) => {
                let stale = process.drain_stale();
                debug!(
                    "Reusing {} encoder process #{} ({} stale events)",
                    self.band,
                    process.id(),
                    stale
                );
                process
            }
            None => {
                let process = factory.spawn(self.band)?;
                self.spawned += 1;
                process
            }
        };
        let process = self.process.insert(process);

        self.output.clear();
        self.state.set(ChannelState::Initializing);

        if !process.send(EncoderCommand::Init { config }) {
            return Err(self.abandon("process exited before init"));
        }

        let band = self.band;
        let ack = tokio::time::timeout(timeout, async {
            loop {
                match process.recv().await {
                    Some(event) if event.is_ready() => return Ok(()),
                    Some(event) => debug!("{} encoder event during init: {:?}", band, event),
                    None => return Err("process exited during init"),
                }
            }
        })
        .await;

        match ack {
            Ok(Ok(())) => {
                self.state.set(ChannelState::Ready);
                info!("{} encoder ready", self.band);
                Ok(())
            }
            Ok(Err(reason)) => Err(self.abandon(reason)),
            Err(_) => Err(self.abandon(&format!("no ack within {:?}", timeout))),
        }
    }

    /// Ask for container header pages (wide-band only)
    pub fn request_header_pages(&self) {
        if self.band != Band::Wide {
            warn!("Header pages requested from {} channel; ignored", self.band);
            return;
        }
        self.send_when_ready(EncoderCommand::GetHeaderPages);
    }

    /// Send `flush` and wait for `flushed`, collecting incremental output
    pub async fn flush(&mut self) -> Result<()> {
        if !self.send_when_ready(EncoderCommand::Flush) {
            return Ok(());
        }
        let band = self.band;
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };
        loop {
            match process.recv().await {
                Some(EncoderEvent::Flushed) => return Ok(()),
                Some(EncoderEvent::Process { buf }) => self.output.extend_from_slice(&buf),
                Some(event) => debug!("{} encoder event during flush: {:?}", band, event),
                None => {
                    self.process = None;
                    self.state.set(ChannelState::Uninitialized);
                    return Err(RecorderError::EncoderTerminated { band });
                }
            }
        }
    }

    /// Send `finish` (plus teardown when processes are not reused) and wait
    /// for `end`. Returns this session's finished buffer, exactly once.
    ///
    /// Event listening for the session stops at `end`; nothing the process
    /// sends afterwards is observed.
    pub async fn finish(&mut self) -> Result<Vec<u8>> {
        let band = self.band;
        if self.state() != ChannelState::Ready {
            warn!("finish sent to {} channel in state {:?}; ignored", band, self.state());
            return Err(RecorderError::EncoderTerminated { band });
        }
        let Some(process) = self.process.as_mut() else {
            return Err(RecorderError::EncoderTerminated { band });
        };

        self.state.set(ChannelState::Finishing);
        process.send(EncoderCommand::Finish);
        if !self.reuse {
            process.send(band.teardown_command());
        }

        let final_buffer = loop {
            match process.recv().await {
                Some(EncoderEvent::End { buf }) => break Some(buf),
                Some(EncoderEvent::Process { buf }) => {
                    debug!("{} encoder partial output: {} bytes", band, buf.len());
                    self.output.extend_from_slice(&buf);
                }
                Some(event) => debug!("{} encoder event during finish: {:?}", band, event),
                None => break None,
            }
        };

        let Some(final_buffer) = final_buffer else {
            self.process = None;
            self.output.clear();
            self.state.set(ChannelState::Uninitialized);
            return Err(RecorderError::EncoderTerminated { band });
        };

        let mut buffer = std::mem::take(&mut self.output);
        buffer.extend_from_slice(&final_buffer);

        if self.reuse {
            self.state.set(ChannelState::Ready);
            debug!("{} encoder process retained for reuse", band);
        } else {
            self.process = None;
            self.state.set(ChannelState::Closed);
            debug!("{} encoder process torn down", band);
        }

        info!("{} channel finished: {} bytes", band, buffer.len());
        Ok(buffer)
    }

    /// Undo a half-started session: keep a ready process only when reuse is
    /// enabled, otherwise tear it down.
    pub fn reset(&mut self) {
        if self.reuse && self.state() == ChannelState::Ready {
            return;
        }
        if let Some(process) = self.process.take() {
            process.send(self.band.teardown_command());
        }
        self.output.clear();
        self.state.set(ChannelState::Uninitialized);
    }

    /// Tear down a retained process regardless of the reuse policy. The next
    /// `init` spawns a fresh one.
    pub fn destroy(&mut self) {
        let Some(process) = self.process.take() else {
            debug!("No {} encoder process to destroy", self.band);
            return;
        };
        let teardown = self.band.teardown_command();
        debug!(
            "Destroying {} encoder process #{} ({})",
            self.band,
            process.id(),
            teardown.name()
        );
        process.send(teardown);
        self.output.clear();
        self.state.set(ChannelState::Closed);
    }

    fn send_when_ready(&self, command: EncoderCommand) -> bool {
        let state = self.state();
        match &self.process {
            Some(process) if state == ChannelState::Ready => process.send(command),
            _ => {
                warn!(
                    "Protocol violation: {} sent to {} channel in state {:?}; dropped",
                    command.name(),
                    self.band,
                    state
                );
                false
            }
        }
    }

    fn abandon(&mut self, reason: &str) -> RecorderError {
        self.process = None;
        self.state.set(ChannelState::Uninitialized);
        self.init_error(reason.to_string())
    }

    fn init_error(&self, reason: String) -> RecorderError {
        RecorderError::EncoderInit {
            band: self.band,
            reason,
        }
    }
}
