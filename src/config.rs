//! Configuration management
//!
//! Values come from an optional TOML file named by `GOVERNOR_CONFIG`, then
//! `GOVERNOR_*` environment variables on top.

use chrono::{FixedOffset, Local, Offset, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::autonomous::{LoopConfig, ProactiveConfig};
use crate::llm::OllamaConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Governor configuration
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Root under which `state/` documents live
    pub workspace: PathBuf,

    /// Attention re-evaluation period
    pub tick_interval: Duration,

    /// Floor between reflections
    pub min_interval: Duration,

    /// Ceiling between reflections
    pub max_interval: Duration,

    pub urgency_threshold: f64,

    /// Idle time before a thread is a follow-up candidate
    pub stale_after_hours: u64,

    /// Score follow-ups without dispatching
    pub shadow_mode: bool,

    /// Offset from UTC used for time-of-day rhythm
    pub utc_offset_minutes: i32,

    pub ollama_url: String,
    pub model: String,
}

/// TOML file layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    workspace: Option<String>,
    tick_interval_secs: Option<u64>,
    min_interval_secs: Option<u64>,
    max_interval_secs: Option<u64>,
    urgency_threshold: Option<f64>,
    stale_after_hours: Option<u64>,
    shadow_mode: Option<bool>,
    utc_offset_minutes: Option<i32>,
    ollama_url: Option<String>,
    model: Option<String>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        let ollama = OllamaConfig::default();
        Self {
            workspace: default_workspace(),
            tick_interval: Duration::from_secs(60),
            min_interval: Duration::from_secs(10 * 60),
            max_interval: Duration::from_secs(4 * 60 * 60),
            urgency_threshold: 0.6,
            stale_after_hours: 48,
            shadow_mode: false,
            utc_offset_minutes: Local::now().offset().local_minus_utc() / 60,
            ollama_url: ollama.url,
            model: ollama.model,
        }
    }
}

fn default_workspace() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autonomy-governor")
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

fn parse_var<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        message: format!("cannot parse {:?}", raw),
    })
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            message: format!("expected a boolean, got {:?}", raw),
        }),
    }
}

impl GovernorConfig {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("GOVERNOR_CONFIG") {
            config.apply_file(&expand_path(&path))?;
        }

        if let Some(v) = lookup("GOVERNOR_WORKSPACE") {
            config.workspace = expand_path(&v);
        }
        if let Some(v) = lookup("GOVERNOR_TICK_SECS") {
            config.tick_interval = Duration::from_secs(parse_var("GOVERNOR_TICK_SECS", &v)?);
        }
        if let Some(v) = lookup("GOVERNOR_MIN_INTERVAL_SECS") {
            config.min_interval =
                Duration::from_secs(parse_var("GOVERNOR_MIN_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("GOVERNOR_MAX_INTERVAL_SECS") {
            config.max_interval =
                Duration::from_secs(parse_var("GOVERNOR_MAX_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("GOVERNOR_URGENCY_THRESHOLD") {
            config.urgency_threshold = parse_var("GOVERNOR_URGENCY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("GOVERNOR_STALE_AFTER_HOURS") {
            config.stale_after_hours = parse_var("GOVERNOR_STALE_AFTER_HOURS", &v)?;
        }
        if let Some(v) = lookup("GOVERNOR_SHADOW_MODE") {
            config.shadow_mode = parse_flag("GOVERNOR_SHADOW_MODE", &v)?;
        }
        if let Some(v) = lookup("GOVERNOR_UTC_OFFSET_MINUTES") {
            config.utc_offset_minutes = parse_var("GOVERNOR_UTC_OFFSET_MINUTES", &v)?;
        }
        if let Some(v) = lookup("OLLAMA_URL") {
            config.ollama_url = v;
        }
        if let Some(v) = lookup("GOVERNOR_MODEL") {
            config.model = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.workspace {
            self.workspace = expand_path(&v);
        }
        if let Some(v) = file.tick_interval_secs {
            self.tick_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.min_interval_secs {
            self.min_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.max_interval_secs {
            self.max_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.urgency_threshold {
            self.urgency_threshold = v;
        }
        if let Some(v) = file.stale_after_hours {
            self.stale_after_hours = v;
        }
        if let Some(v) = file.shadow_mode {
            self.shadow_mode = v;
        }
        if let Some(v) = file.utc_offset_minutes {
            self.utc_offset_minutes = v;
        }
        if let Some(v) = file.ollama_url {
            self.ollama_url = v;
        }
        if let Some(v) = file.model {
            self.model = v;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.urgency_threshold) {
            return Err(ConfigError::Invalid {
                key: "urgency_threshold",
                message: format!("{} is outside [0, 1]", self.urgency_threshold),
            });
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "tick_interval",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.min_interval > self.max_interval {
            return Err(ConfigError::Invalid {
                key: "min_interval",
                message: format!(
                    "{}s exceeds max_interval of {}s",
                    self.min_interval.as_secs(),
                    self.max_interval.as_secs()
                ),
            });
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Invalid {
                key: "utc_offset_minutes",
                message: format!("{} is not a valid offset", self.utc_offset_minutes),
            });
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            tick_interval: self.tick_interval,
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            urgency_threshold: self.urgency_threshold,
            utc_offset: self.utc_offset(),
        }
    }

    pub fn proactive_config(&self) -> ProactiveConfig {
        ProactiveConfig {
            shadow_mode: self.shadow_mode,
            ..ProactiveConfig::default()
        }
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            url: self.ollama_url.clone(),
            model: self.model.clone(),
            ..OllamaConfig::default()
        }
    }
}
