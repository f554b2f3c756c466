use anyhow::Result;
use serde::Deserialize;

use crate::session::RecorderConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub encoder: EncoderConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Command that runs an encoder worker over stdio (e.g. `loqa-recorder`).
    /// When unset, encoders run as in-process tasks.
    pub worker_command: Option<String>,
    pub worker_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "~/.loqa/recordings".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (any format the `config` crate understands), then apply
    /// `LOQA_RECORDER__SECTION__KEY` environment overrides.
    ///
    /// `LOQA_RECORDER__ENCODER__WORKER_ARGS` is split on spaces.
    pub fn load(path: &str) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(path: &str, env: Option<config::Map<String, String>>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOQA_RECORDER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("encoder.worker_args")
                    .source(env),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
