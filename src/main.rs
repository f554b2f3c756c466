use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_recorder::encoder::run_stdio_worker;
use loqa_recorder::{
    AudioFile, Band, Config, EncoderFactory, FileBackend, MemoryVolumeStore, RecorderDelegate,
    SessionController, SubprocessEncoderFactory, TaskEncoderFactory,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-recorder", version, about = "Dual-band audio recorder")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record an audio file through a full session
    Record {
        /// Audio file to use as the capture source
        #[arg(short, long)]
        input: PathBuf,

        /// Config file, without extension
        #[arg(short, long, default_value = "config/loqa-recorder")]
        config: String,

        /// Output directory (overrides the config file)
        #[arg(long)]
        out_dir: Option<String>,

        /// Pace blocks like a live device instead of as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Recording volume for this session
        #[arg(long)]
        volume: Option<f32>,
    },

    /// Serve the reference encoder protocol on stdin/stdout
    EncoderWorker {
        #[arg(long, value_enum)]
        band: Band,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Record {
            input,
            config,
            out_dir,
            realtime,
            volume,
        } => {
            init_tracing(cli.verbose, false);
            record(input, &config, out_dir, realtime, volume).await
        }
        Command::EncoderWorker { band } => {
            // stdout carries the protocol
            init_tracing(cli.verbose, true);
            run_stdio_worker(band).await
        }
    }
}

fn init_tracing(verbose: u8, to_stderr: bool) {
    let default_level = if verbose > 0 { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

async fn record(
    input: PathBuf,
    config_path: &str,
    out_dir: Option<String>,
    realtime: bool,
    volume: Option<f32>,
) -> Result<()> {
    let cfg = Config::load(config_path).context("Failed to load config")?;
    info!("Loqa Recorder v{}", env!("CARGO_PKG_VERSION"));

    let audio = AudioFile::open(&input)?;
    info!(
        "Input: {} ({:.1}s, {}Hz, {} channel(s))",
        audio.path, audio.duration_seconds, audio.sample_rate, audio.channels
    );

    let out_dir = out_dir.unwrap_or_else(|| cfg.output.directory.clone());
    let out_dir = PathBuf::from(shellexpand::tilde(&out_dir).into_owned());
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let (started_tx, started_rx) = watch::channel(false);
    let backend = FileBackend::new(
        &audio,
        cfg.recorder.block_length,
        cfg.recorder.channel_count,
        realtime,
    )
    .start_when(started_rx);
    let mut drained = backend.drained();
    info!(
        "Replaying {} block(s) of {} frames",
        backend.block_count(),
        cfg.recorder.block_length
    );

    let factory: Arc<dyn EncoderFactory> = match &cfg.encoder.worker_command {
        Some(program) => Arc::new(SubprocessEncoderFactory::new(
            program.clone(),
            cfg.encoder.worker_args.clone(),
        )),
        None => Arc::new(TaskEncoderFactory),
    };
    info!("Encoders: {}", factory.name());

    let mut controller = SessionController::new(
        cfg.recorder,
        Box::new(backend),
        factory,
        Arc::new(MemoryVolumeStore::default()),
    )?;
    let writer = Arc::new(FileWriter::new(out_dir, started_tx));
    controller.set_delegate(writer.clone());
    if let Some(volume) = volume {
        controller.set_recording_volume(volume);
    }

    controller
        .start(None)
        .await
        .context("Failed to start recording")?;
    if let Some(id) = controller.stats().session_id {
        writer.set_prefix(id);
    }

    tokio::select! {
        result = drained.wait_for(|done| *done) => {
            if result.is_err() {
                error!("File source went away before draining");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted; stopping"),
    }

    controller.stop().await.context("Failed to stop recording")?;

    let stats = serde_json::to_string_pretty(&controller.stats())?;
    info!("Session stats:\n{}", stats);
    Ok(())
}

/// Writes each band's finished buffer next to the others
struct FileWriter {
    out_dir: PathBuf,
    prefix: Mutex<String>,
    started: watch::Sender<bool>,
}

impl FileWriter {
    fn new(out_dir: PathBuf, started: watch::Sender<bool>) -> Self {
        Self {
            out_dir,
            prefix: Mutex::new("recording".to_string()),
            started,
        }
    }

    fn set_prefix(&self, prefix: String) {
        *self.prefix.lock() = prefix;
    }

    fn write(&self, suffix: &str, buffer: &[u8]) {
        let path = self
            .out_dir
            .join(format!("{}-{}.wav", self.prefix.lock(), suffix));
        match std::fs::write(&path, buffer) {
            Ok(()) => info!("Wrote {} ({} bytes)", path.display(), buffer.len()),
            Err(e) => error!("Failed to write {}: {}", path.display(), e),
        }
    }
}

impl RecorderDelegate for FileWriter {
    fn on_start(&self) {
        self.started.send_replace(true);
    }

    fn on_wide_band_data(&self, buffer: Vec<u8>, duration_secs: f64) {
        info!("Wide-band recording: {:.2}s", duration_secs);
        self.write("wide", &buffer);
    }

    fn on_voice_band_data(&self, buffer: Vec<u8>) {
        self.write("voice", &buffer);
    }

    fn on_stop(&self) {
        info!("Recording complete");
    }
}
