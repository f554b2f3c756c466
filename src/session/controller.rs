use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::completion::CompletionGate;
use super::config::RecorderConfig;
use super::delegate::{NoopDelegate, RecorderDelegate, VolumeStore};
use super::dispatch::{BlockDispatcher, DispatchCounters};
use super::state::{next, SessionState, SharedSessionState, Transition};
use super::stats::SessionStats;
use crate::audio::{AudioBackend, AudioBlock, AudioRouting, BlockSink, MonitorSink, Resampler};
use crate::encoder::{Band, ChannelState, EncoderChannel, EncoderFactory, EncoderInit};
use crate::error::{RecorderError, Result};

/// Routing graph plus dispatcher: everything a captured block passes through
struct CapturePath {
    routing: AudioRouting,
    dispatcher: BlockDispatcher,
}

impl CapturePath {
    fn process(&mut self, block: &AudioBlock) {
        let gained = self.routing.route(block);
        self.dispatcher.dispatch(&gained);
    }
}

/// Owns one recorder: its capture source, both encoder channels and the
/// session state machine.
///
/// Lifecycle:
/// 1. `start()` acquires capture, initialises both encoders, starts recording
/// 2. `pause()` / `resume()` gate which blocks reach the encoders
/// 3. `stop()` releases capture, finishes both encoders and fires `on_stop`
///    once both buffers have been delivered
pub struct SessionController {
    config: RecorderConfig,
    backend: Box<dyn AudioBackend>,
    /// Caller-provided source for the current session only
    external: Option<Box<dyn AudioBackend>>,
    factory: Arc<dyn EncoderFactory>,
    volume_store: Arc<dyn VolumeStore>,
    delegate: Arc<dyn RecorderDelegate>,
    monitor_sink: Option<MonitorSink>,

    state: SharedSessionState,
    wide: EncoderChannel,
    voice: EncoderChannel,
    gate: CompletionGate,
    capture: Arc<Mutex<Option<CapturePath>>>,
    counters: Arc<DispatchCounters>,
    capture_rate: u32,

    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    duration_secs: f64,
    completed_sessions: u64,
}

impl SessionController {
    /// Whether capture and encoder processes are both available
    pub fn is_recording_supported(backend: &dyn AudioBackend, factory: &dyn EncoderFactory) -> bool {
        backend.is_available() && factory.is_available()
    }

    pub fn new(
        config: RecorderConfig,
        backend: Box<dyn AudioBackend>,
        factory: Arc<dyn EncoderFactory>,
        volume_store: Arc<dyn VolumeStore>,
    ) -> Result<Self> {
        if !Self::is_recording_supported(backend.as_ref(), factory.as_ref()) {
            return Err(RecorderError::UnsupportedEnvironment(format!(
                "capture backend '{}' available: {}, encoder runtime '{}' available: {}",
                backend.name(),
                backend.is_available(),
                factory.name(),
                factory.is_available()
            )));
        }
        config.validate()?;

        info!(
            "Recorder created: backend '{}', encoders '{}', block {} x {} channel(s)",
            backend.name(),
            factory.name(),
            config.block_length,
            config.channel_count
        );

        let reuse = config.reuse_encoder_process;
        Ok(Self {
            config,
            backend,
            external: None,
            factory,
            volume_store,
            delegate: Arc::new(NoopDelegate),
            monitor_sink: None,
            state: SharedSessionState::new(),
            wide: EncoderChannel::new(Band::Wide, reuse),
            voice: EncoderChannel::new(Band::Voice, reuse),
            gate: CompletionGate::new(),
            capture: Arc::new(Mutex::new(None)),
            counters: Arc::new(DispatchCounters::default()),
            capture_rate: 0,
            session_id: None,
            started_at: None,
            duration_secs: 0.0,
            completed_sessions: 0,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn RecorderDelegate>) {
        self.delegate = delegate;
    }

    /// Destination for the monitor copy of the input; applies from the next start
    pub fn set_monitor_sink(&mut self, sink: Option<MonitorSink>) {
        self.monitor_sink = sink;
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Start a session, capturing from `source` if given, otherwise from the
    /// configured backend. A no-op unless inactive.
    pub async fn start(&mut self, source: Option<Box<dyn AudioBackend>>) -> Result<()> {
        if self.ignored(Transition::Start) {
            return Ok(());
        }

        let session_id = Uuid::new_v4().to_string();
        info!("Starting recording session: {}", session_id);

        self.external = source;
        self.counters = Arc::new(DispatchCounters::default());

        let slot = self.capture.clone();
        let counters = self.counters.clone();
        let sink: BlockSink = Arc::new(move |block: &AudioBlock| match slot.lock().as_mut() {
            Some(path) => path.process(block),
            None => counters.drop_block(),
        });

        let format = match self.active_backend().start(sink).await {
            Ok(format) => format,
            Err(e) => {
                error!("Failed to acquire capture: {}", e);
                self.external = None;
                return Err(e);
            }
        };
        info!(
            "Capturing from '{}': {}Hz, {} channel(s)",
            self.active_backend().name(),
            format.sample_rate,
            format.channels
        );
        if format.channels != self.config.channel_count {
            warn!(
                "Capture delivers {} channel(s) but {} are configured; mismatched blocks will be rejected",
                format.channels, self.config.channel_count
            );
        }
        if format.sample_rate != self.config.encode_sample_rate {
            debug!(
                "Capture rate {}Hz differs from preferred {}Hz; wide-band encodes at capture rate",
                format.sample_rate, self.config.encode_sample_rate
            );
        }

        self.gate.arm();
        let resampler = Resampler::new(
            format.sample_rate,
            self.config.voice_target_rate,
            1,
            self.config.block_length,
            self.config.resample_quality,
        );

        let timeout = self.config.init_timeout();
        let wide_init = self.init_config(Band::Wide, format.sample_rate);
        let voice_init = self.init_config(Band::Voice, format.sample_rate);
        let factory = self.factory.as_ref();
        let (wide_result, voice_result) = futures::future::join(
            self.wide.init(factory, wide_init, timeout),
            self.voice.init(factory, voice_init, timeout),
        )
        .await;

        let sinks = wide_result
            .and(voice_result)
            .and_then(|()| match (self.wide.sink(), self.voice.sink()) {
                (Some(wide), Some(voice)) => Ok((wide, voice)),
                _ => Err(RecorderError::EncoderInit {
                    band: if self.wide.sink().is_none() { Band::Wide } else { Band::Voice },
                    reason: "no live process after init".into(),
                }),
            });
        let (wide_sink, voice_sink) = match sinks {
            Ok(sinks) => sinks,
            Err(e) => {
                error!("Failed to initialise encoders: {}", e);
                self.abort_start().await;
                return Err(e);
            }
        };

        let routing = AudioRouting::new(
            self.recording_volume(),
            self.config.monitor_gain,
            format.sample_rate,
            self.monitor_sink.clone(),
        );
        let dispatcher = BlockDispatcher::new(
            self.state.clone(),
            wide_sink,
            voice_sink,
            resampler,
            self.config.block_length,
            self.config.channel_count,
            self.counters.clone(),
        );
        *self.capture.lock() = Some(CapturePath { routing, dispatcher });

        self.capture_rate = format.sample_rate;
        self.session_id = Some(session_id);
        self.started_at = Some(Utc::now());
        self.duration_secs = 0.0;
        self.state.set(SessionState::Recording);

        info!("Recording session started successfully");
        self.delegate.on_start();
        self.wide.request_header_pages();
        Ok(())
    }

    /// Pause forwarding. With `flush` in streaming mode, waits for the
    /// wide-band encoder to flush its pending pages first.
    pub async fn pause(&mut self, flush: bool) -> Result<()> {
        if self.ignored(Transition::Pause) {
            return Ok(());
        }
        self.state.set(SessionState::Paused);

        let flushed = if flush && self.config.stream_pages {
            debug!("Flushing wide-band encoder before pause");
            self.wide.flush().await
        } else {
            Ok(())
        };
        if let Err(e) = &flushed {
            error!("Flush before pause failed: {}", e);
        }

        info!("Recording paused");
        self.delegate.on_pause();
        flushed
    }

    pub fn resume(&mut self) {
        if self.ignored(Transition::Resume) {
            return;
        }
        self.state.set(SessionState::Recording);
        info!("Recording resumed");
        self.delegate.on_resume();
    }

    /// Stop the session and deliver both encoded buffers. `on_stop` fires
    /// once both channels have terminated; the first channel failure is
    /// returned afterwards.
    pub async fn stop(&mut self) -> Result<()> {
        if self.ignored(Transition::Stop) {
            return Ok(());
        }

        info!(
            "Stopping recording session: {}",
            self.session_id.as_deref().unwrap_or("-")
        );
        self.state.set(SessionState::Inactive);

        if let Err(e) = self.active_backend().stop().await {
            error!("Failed to stop audio backend: {}", e);
        }
        self.external = None;
        // Disconnects the routing graph and the channel sinks.
        drop(self.capture.lock().take());

        let duration = self.counters.frames_forwarded() as f64 / self.capture_rate.max(1) as f64;
        self.duration_secs = duration;
        debug!("Recorded {:.3}s", duration);

        let delegate = self.delegate.as_ref();
        let gate = &self.gate;
        let (wide_result, voice_result) = futures::future::join(
            finish_band(&mut self.wide, gate, delegate, duration),
            finish_band(&mut self.voice, gate, delegate, duration),
        )
        .await;

        if self.gate.remaining() == 0 {
            self.completed_sessions += 1;
        }
        info!("Recording session stopped successfully");
        wide_result.and(voice_result)
    }

    /// Release encoder processes retained for reuse. A no-op unless inactive.
    pub fn destroy_encoders(&mut self) {
        let state = self.state.get();
        if state != SessionState::Inactive {
            warn!("Encoder teardown ignored while {}", state);
            return;
        }
        self.wide.destroy();
        self.voice.destroy();
        info!("Encoder processes released");
    }

    /// Set the recording gain: applied to the live graph (smoothed) and
    /// persisted for future sessions. Allowed in any state.
    pub fn set_recording_volume(&mut self, gain: f32) {
        let Some(gain) = valid_gain(gain) else {
            return;
        };
        self.config.recording_gain = Some(gain);
        if let Some(path) = self.capture.lock().as_mut() {
            path.routing.set_recording_gain(gain);
        }
        self.volume_store.save(gain);
        info!("Recording volume set to {:.2}", gain);
    }

    /// Set the monitor gain; applied to the live graph (smoothed)
    pub fn set_monitor_gain(&mut self, gain: f32) {
        let Some(gain) = valid_gain(gain) else {
            return;
        };
        self.config.monitor_gain = gain;
        if let Some(path) = self.capture.lock().as_mut() {
            path.routing.set_monitor_gain(gain);
        }
        info!("Monitor gain set to {:.2}", gain);
    }

    /// Configured recording gain, else the persisted volume, else unity
    pub fn recording_volume(&self) -> f32 {
        self.config
            .recording_gain
            .or_else(|| self.volume_store.load())
            .unwrap_or(1.0)
    }

    pub fn monitor_gain(&self) -> f32 {
        self.config.monitor_gain
    }

    /// Gain currently applied by the live routing graph, if one is connected
    pub fn live_recording_gain(&self) -> Option<f32> {
        self.capture
            .lock()
            .as_ref()
            .map(|path| path.routing.recording_gain().current())
    }

    pub fn channel_state(&self, band: Band) -> ChannelState {
        self.channel(band).state()
    }

    /// Encoder processes a band has spawned over the recorder's lifetime
    pub fn processes_spawned(&self, band: Band) -> usize {
        self.channel(band).processes_spawned()
    }

    pub fn stats(&self) -> SessionStats {
        let state = self.state.get();
        let duration_secs = match state {
            SessionState::Inactive => self.duration_secs,
            _ => self.counters.frames_forwarded() as f64 / self.capture_rate.max(1) as f64,
        };
        SessionStats {
            session_id: self.session_id.clone(),
            state,
            started_at: self.started_at,
            duration_secs,
            blocks_forwarded: self.counters.blocks_forwarded(),
            blocks_dropped: self.counters.blocks_dropped(),
            completed_sessions: self.completed_sessions,
            encoder_processes_spawned: self.wide.processes_spawned() + self.voice.processes_spawned(),
        }
    }

    fn channel(&self, band: Band) -> &EncoderChannel {
        match band {
            Band::Wide => &self.wide,
            Band::Voice => &self.voice,
        }
    }

    fn active_backend(&mut self) -> &mut dyn AudioBackend {
        match self.external.as_mut() {
            Some(external) => external.as_mut(),
            None => self.backend.as_mut(),
        }
    }

    /// Logs and returns `true` when `transition` is a no-op from the current state
    fn ignored(&self, transition: Transition) -> bool {
        let state = self.state.get();
        if next(state, transition).is_some() {
            return false;
        }
        warn!("{:?} ignored while {}", transition, state);
        true
    }

    fn init_config(&self, band: Band, capture_rate: u32) -> EncoderInit {
        let (sample_rate, original_sample_rate) = match band {
            Band::Wide => (capture_rate, None),
            Band::Voice => (self.config.voice_target_rate, Some(capture_rate)),
        };
        EncoderInit {
            sample_rate,
            bit_rate: self.config.output_bit_depth,
            original_sample_rate,
            encoder_application: Some(self.config.encoder_application),
            encoder_frame_size: Some(self.config.encoder_frame_size),
            max_frames_per_page: Some(self.config.max_frames_per_page),
        }
    }

    /// Release everything a failed start acquired; the session stays inactive
    async fn abort_start(&mut self) {
        if let Err(e) = self.active_backend().stop().await {
            warn!("Failed to release capture after aborted start: {}", e);
        }
        self.external = None;
        self.capture.lock().take();
        self.wide.reset();
        self.voice.reset();
    }
}

/// Finish one channel, hand its buffer to the delegate and complete its band
async fn finish_band(
    channel: &mut EncoderChannel,
    gate: &CompletionGate,
    delegate: &dyn RecorderDelegate,
    duration_secs: f64,
) -> Result<()> {
    let band = channel.band();
    let result = match channel.finish().await {
        Ok(buffer) => {
            match band {
                Band::Wide => delegate.on_wide_band_data(buffer, duration_secs),
                Band::Voice => delegate.on_voice_band_data(buffer),
            }
            Ok(())
        }
        Err(e) => {
            error!("{} channel failed to finish: {}", band, e);
            Err(e)
        }
    };

    if gate.complete(band) {
        info!("Both encoders finished");
        delegate.on_stop();
    }
    result
}

fn valid_gain(gain: f32) -> Option<f32> {
    if gain.is_finite() && gain >= 0.0 {
        Some(gain)
    } else {
        warn!("Ignoring invalid gain {}", gain);
        None
    }
}
