//! Settings configuration
//!
//! Default values are defined in `config/default.toml`. A user file, either
//! passed explicitly or found in the platform config directory, is merged on
//! top of them. Command-line flags override both.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default configuration TOML embedded from config/default.toml
const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// All tunables for both evaluators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub probe: ProbeSettings,
    pub request: RequestSettings,
    pub perplexity: PerplexitySettings,
    pub dataset: DatasetSettings,
    pub gpqa: GpqaSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL of the inference server, without the `/v1` suffix
    pub base_url: String,
    pub health_timeout_secs: u64,
}

/// Endpoint detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Candidate completion paths, tried in order
    pub endpoints: Vec<String>,
    /// Non-404 statuses that count as a working endpoint
    pub usable_statuses: Vec<u16>,
    pub timeout_secs: u64,
    pub explore_timeout_secs: u64,
}

/// Per-chunk completion request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSettings {
    pub timeout_secs: u64,
    /// Pause between consecutive chunk requests
    pub delay_ms: u64,
    pub max_tokens: u32,
    pub logprobs: u32,
    pub temperature: f32,
}

/// How the token sequence is cut into requests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerplexityMode {
    /// Fixed, non-overlapping chunks of `chunk_size` tokens
    #[default]
    Chunked,
    /// Overlapping windows of `max_length` tokens advanced by `stride`
    Sliding,
}

impl FromStr for PerplexityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chunked" | "simple" => Ok(Self::Chunked),
            "sliding" | "sliding-window" => Ok(Self::Sliding),
            other => Err(format!(
                "unknown perplexity mode '{other}' (expected chunked or sliding)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerplexitySettings {
    #[serde(default)]
    pub mode: PerplexityMode,
    pub chunk_size: usize,
    pub max_length: usize,
    pub stride: usize,
}

/// Where the wikitext rows come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// HuggingFace datasets-server `rows` endpoint
    pub rows_url: String,
    pub name: String,
    pub config: String,
    pub split: String,
    /// Rows per request (the rows API caps this at 100)
    pub page_size: usize,
    pub timeout_secs: u64,
}

/// External `gpt_oss.evals` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpqaSettings {
    pub python: String,
    pub module: String,
    pub eval: String,
    pub reasoning_effort: String,
    pub n_threads: u32,
    pub timeout_secs: u64,
    pub api_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("embedded default.toml must be valid")
    }
}

impl ServerSettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn explore_timeout(&self) -> Duration {
        Duration::from_secs(self.explore_timeout_secs)
    }
}

impl RequestSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Recursively merge `overlay` TOML values on top of `base`.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
        (base, _) => {
            *base = overlay.clone();
        }
    }
}

/// Parse user TOML content merged on top of default.toml.
fn parse_with_defaults(user_content: &str) -> Result<Settings> {
    let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)?;
    let user: toml::Value = toml::from_str(user_content)?;
    merge_toml(&mut base, &user);
    let settings: Settings = base.try_into()?;
    Ok(settings)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "vllm-accuracy", "vllm-accuracy")
}

impl Settings {
    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load settings from `path` when given, otherwise from the user config
    /// file. Falls back to the embedded defaults when neither exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            debug!("Loading config from {:?}", path);
            return Self::load_from(path);
        }

        let Some(config_file) = Self::config_file() else {
            warn!("Could not determine config directory, using defaults");
            return Ok(Self::default());
        };

        if !config_file.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        debug!("Loading config from {:?}", config_file);
        Self::load_from(&config_file)
    }

    /// Load settings from a specific file, merged on top of defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        parse_with_defaults(&content)
    }
}
