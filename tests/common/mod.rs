// Shared fixtures for the recorder integration tests
//
// MockEncoderFactory spawns scripted encoder processes that log every command
// they receive and answer `finish` with "<band>:<frames encoded>".

#![allow(dead_code)]

use loqa_recorder::audio::{PushHandle, PushSource};
use loqa_recorder::encoder::{
    Band, EncoderCommand, EncoderEndpoint, EncoderEvent, EncoderFactory, EncoderProcess,
};
use loqa_recorder::session::{
    MemoryVolumeStore, RecorderConfig, RecorderDelegate, SessionController,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const RATE: u32 = 48000;

#[derive(Debug, Clone, Copy, Default)]
struct Script {
    fail_init: bool,
    exit_on_finish: bool,
    init_delay: Option<Duration>,
    end_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MockEncoderFactory {
    log: Arc<Mutex<Vec<(Band, EncoderCommand)>>>,
    spawned: Mutex<HashMap<Band, usize>>,
    fail_init: Mutex<HashSet<Band>>,
    exit_on_finish: Mutex<HashSet<Band>>,
    init_delay: Mutex<HashMap<Band, Duration>>,
    end_delay: Mutex<HashMap<Band, Duration>>,
    live: Arc<AtomicUsize>,
}

/// Counts a mock process as live until it exits
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockEncoderFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Processes of `band` exit instead of acking `init`
    pub fn fail_init(&self, band: Band) {
        self.fail_init.lock().insert(band);
    }

    /// Processes of `band` exit instead of answering `finish`
    pub fn exit_on_finish(&self, band: Band) {
        self.exit_on_finish.lock().insert(band);
    }

    /// Processes of `band` wait `delay` before acking `init`
    pub fn delay_init(&self, band: Band, delay: Duration) {
        self.init_delay.lock().insert(band, delay);
    }

    /// Processes of `band` wait `delay` before sending `end`
    pub fn delay_end(&self, band: Band, delay: Duration) {
        self.end_delay.lock().insert(band, delay);
    }

    /// Wait until every spawned mock process has exited
    pub async fn settle(&self) {
        for _ in 0..1000 {
            if self.live.load(Ordering::SeqCst) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("mock encoder processes still running");
    }

    pub fn spawned(&self, band: Band) -> usize {
        self.spawned.lock().get(&band).copied().unwrap_or(0)
    }

    pub fn commands(&self, band: Band) -> Vec<EncoderCommand> {
        self.log
            .lock()
            .iter()
            .filter(|(b, _)| *b == band)
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn command_names(&self, band: Band) -> Vec<&'static str> {
        self.commands(band).iter().map(EncoderCommand::name).collect()
    }

    pub fn encoded(&self, band: Band) -> Vec<Vec<f32>> {
        self.commands(band)
            .into_iter()
            .filter_map(|command| match command {
                EncoderCommand::Encode { buf } => Some(buf),
                _ => None,
            })
            .collect()
    }
}

impl EncoderFactory for MockEncoderFactory {
    fn spawn(&self, band: Band) -> loqa_recorder::Result<EncoderProcess> {
        *self.spawned.lock().entry(band).or_default() += 1;
        let script = Script {
            fail_init: self.fail_init.lock().contains(&band),
            exit_on_finish: self.exit_on_finish.lock().contains(&band),
            init_delay: self.init_delay.lock().get(&band).copied(),
            end_delay: self.end_delay.lock().get(&band).copied(),
        };
        let (process, endpoint) = EncoderProcess::pair();
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));
        let log = Arc::clone(&self.log);
        tokio::spawn(async move {
            let _guard = guard;
            run_mock(band, script, endpoint, log).await;
        });
        Ok(process)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

async fn run_mock(
    band: Band,
    script: Script,
    endpoint: EncoderEndpoint,
    log: Arc<Mutex<Vec<(Band, EncoderCommand)>>>,
) {
    let EncoderEndpoint {
        mut commands,
        events,
    } = endpoint;
    let mut frames = 0usize;

    while let Some(command) = commands.recv().await {
        log.lock().push((band, command.clone()));
        match command {
            EncoderCommand::Init { .. } => {
                if script.fail_init {
                    return;
                }
                frames = 0;
                if let Some(delay) = script.init_delay {
                    tokio::time::sleep(delay).await;
                }
                let _ = events.send(band.ready_event());
            }
            EncoderCommand::Encode { buf } => frames += buf.len(),
            EncoderCommand::GetHeaderPages => {}
            EncoderCommand::Flush => {
                let _ = events.send(EncoderEvent::Process {
                    buf: b"page|".to_vec(),
                });
                let _ = events.send(EncoderEvent::Flushed);
            }
            EncoderCommand::Finish => {
                if script.exit_on_finish {
                    return;
                }
                if let Some(delay) = script.end_delay {
                    tokio::time::sleep(delay).await;
                }
                let _ = events.send(EncoderEvent::End {
                    buf: end_payload(band, frames),
                });
            }
            EncoderCommand::Close | EncoderCommand::Destroy => {
                let _ = events.send(EncoderEvent::Destroyed);
                return;
            }
        }
    }
}

pub fn end_payload(band: Band, frames: usize) -> Vec<u8> {
    let name = match band {
        Band::Wide => "wide",
        Band::Voice => "voice",
    };
    format!("{}:{}", name, frames).into_bytes()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    Pause,
    Resume,
    Stop,
    WideData { buffer: Vec<u8>, duration_secs: f64 },
    VoiceData(Vec<u8>),
}

#[derive(Default)]
pub struct RecordingDelegate {
    events: Mutex<Vec<Event>>,
}

impl RecordingDelegate {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, wanted: fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| wanted(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl RecorderDelegate for RecordingDelegate {
    fn on_start(&self) {
        self.push(Event::Start);
    }

    fn on_pause(&self) {
        self.push(Event::Pause);
    }

    fn on_resume(&self) {
        self.push(Event::Resume);
    }

    fn on_stop(&self) {
        self.push(Event::Stop);
    }

    fn on_wide_band_data(&self, buffer: Vec<u8>, duration_secs: f64) {
        self.push(Event::WideData {
            buffer,
            duration_secs,
        });
    }

    fn on_voice_band_data(&self, buffer: Vec<u8>) {
        self.push(Event::VoiceData(buffer));
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub handle: PushHandle,
    pub factory: Arc<MockEncoderFactory>,
    pub delegate: Arc<RecordingDelegate>,
    pub volume_store: Arc<MemoryVolumeStore>,
}

pub fn harness(config: RecorderConfig) -> Harness {
    harness_with(config, MockEncoderFactory::new(), |_| {})
}

/// Build a recorder over a push source, letting `prepare` script the source
pub fn harness_with(
    config: RecorderConfig,
    factory: Arc<MockEncoderFactory>,
    prepare: impl FnOnce(&mut PushSource),
) -> Harness {
    let (mut source, handle) = PushSource::new(RATE, config.channel_count);
    prepare(&mut source);
    let volume_store = Arc::new(MemoryVolumeStore::default());
    let mut controller = SessionController::new(
        config,
        Box::new(source),
        factory.clone(),
        volume_store.clone(),
    )
    .expect("recorder should construct");
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(delegate.clone());
    Harness {
        controller,
        handle,
        factory,
        delegate,
        volume_store,
    }
}

pub fn small_config() -> RecorderConfig {
    RecorderConfig {
        block_length: 480,
        resample_quality: 1,
        encoder_init_timeout_ms: 1000,
        ..RecorderConfig::default()
    }
}
