//! Configuration loading and validation for Tangle.
//!
//! Loads configuration from `~/.tangle/config.toml` with environment
//! variable overrides. Validates all settings at load time. Every field
//! has a default, so an absent or partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.tangle/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model request defaults
    #[serde(default)]
    pub model: ModelConfig,

    /// Agent executor defaults
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Reduce-chain collapse settings
    #[serde(default)]
    pub reduce: ReduceConfig,
}

/// Defaults applied to every model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_temperature() -> f64 {
    0.0
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Defaults for the agent control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Wall-clock limit in seconds. Absent = no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time_secs: Option<u64>,

    /// "generate" lets a genuine finish through on a limited run;
    /// "force" overwrites every finish with the stand-down message.
    #[serde(default = "default_early_stopping")]
    pub early_stopping: String,
}

fn default_max_iterations() -> usize {
    10
}
fn default_early_stopping() -> String {
    "generate".into()
}

impl ExecutorConfig {
    /// The time limit as a `Duration`, if one is configured.
    pub fn max_execution_time(&self) -> Option<Duration> {
        self.max_execution_time_secs.map(Duration::from_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_execution_time_secs: None,
            early_stopping: default_early_stopping(),
        }
    }
}

/// Response cache settings. Off unless asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Reduce-chain collapse settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceConfig {
    /// Token budget a combined prompt must fit within before document
    /// groups stop being collapsed.
    #[serde(default = "default_token_max")]
    pub token_max: usize,
}

fn default_token_max() -> usize {
    3000
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            token_max: default_token_max(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.tangle/config.toml).
    ///
    /// Environment variables override the file:
    /// - `TANGLE_MODEL` replaces the default model id
    /// - `TANGLE_MAX_ITERATIONS` replaces the executor iteration ceiling
    /// - `TANGLE_CACHE` ("1"/"true") enables the response cache
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("TANGLE_MODEL") {
            config.model.model = model;
        }

        if let Ok(raw) = std::env::var("TANGLE_MAX_ITERATIONS") {
            match raw.parse() {
                Ok(n) => config.executor.max_iterations = n,
                Err(_) => {
                    tracing::warn!("Ignoring unparseable TANGLE_MAX_ITERATIONS={raw}");
                }
            }
        }

        if let Ok(raw) = std::env::var("TANGLE_CACHE") {
            config.cache.enabled = raw == "1" || raw.eq_ignore_ascii_case("true");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tangle")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.executor.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "executor.max_iterations must be at least 1".into(),
            ));
        }

        if self.executor.early_stopping != "generate" && self.executor.early_stopping != "force" {
            return Err(ConfigError::ValidationError(format!(
                "executor.early_stopping must be \"generate\" or \"force\", got \"{}\"",
                self.executor.early_stopping
            )));
        }

        if self.reduce.token_max == 0 {
            return Err(ConfigError::ValidationError(
                "reduce.token_max must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for scaffolding a new
    /// config file).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
