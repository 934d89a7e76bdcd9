//! Configuration management for race-engineer.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "race-engineer";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "race-engineer.db";

/// Environment variable that switches the LLM off (demo mode).
const NO_LLM_ENV: &str = "DEMO_NO_LLM";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables prefixed with `RACE_ENGINEER_`, nested keys
///    separated by `__` (e.g. `RACE_ENGINEER_LLM__MODEL`)
/// 2. The short variables `OLLAMA_MODEL`, `OLLAMA_BASE_URL` and `KB_DIR`
/// 3. TOML config file at `~/.config/race-engineer/config.toml`
/// 4. Default values
///
/// `DEMO_NO_LLM`, when set to a non-empty value, forces `llm.enabled = false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// OpenF1 data source configuration.
    pub openf1: OpenF1Config,
    /// HTTP client behaviour shared by all remote calls.
    pub http: HttpConfig,
    /// Language model configuration.
    pub llm: LlmConfig,
    /// Knowledge base configuration.
    pub kb: KnowledgeBaseConfig,
    /// Strategy heuristics.
    pub strategy: StrategyConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/race-engineer/race-engineer.db`
    pub database_path: Option<PathBuf>,
}

/// OpenF1 API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenF1Config {
    /// Base URL of the API, without a trailing slash.
    pub base_url: String,
}

/// HTTP client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds; doubles per attempt.
    pub initial_backoff_ms: u64,
}

/// Language model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Whether the LLM agent is used at all.
    pub enabled: bool,
    /// Ollama server URL.
    pub base_url: String,
    /// Chat model name.
    pub model: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum reasoning steps per question.
    pub max_iterations: usize,
}

/// Knowledge base configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseConfig {
    /// Directory holding the Markdown notes.
    pub dir: PathBuf,
    /// Glob pattern relative to `dir`.
    pub glob: String,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
}

/// Strategy heuristic parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Time lost in the pit lane, in seconds.
    pub pit_loss_s: f64,
    /// Lap-over-lap slowdown that counts as a pace drop, in seconds.
    pub degradation_threshold_s: f64,
    /// Laps of fresh-tyre advantage assumed for an undercut.
    pub undercut_horizon_laps: u32,
    /// Trailing defender laps used for the degradation fit.
    pub defender_tail_laps: usize,
    /// Minimum laps needed for the degradation fit.
    pub min_fit_laps: usize,
}

impl Default for OpenF1Config {
    fn default() -> Self {
        Self {
            base_url: "https://api.openf1.org/v1".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            temperature: 0.0,
            max_iterations: 4,
        }
    }
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("kb"),
            glob: "**/*.md".to_string(),
            chunk_size: 800,
            chunk_overlap: 120,
            top_k: 3,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            pit_loss_s: 20.0,
            degradation_threshold_s: 0.25,
            undercut_horizon_laps: 2,
            defender_tail_laps: 8,
            min_fit_laps: 3,
        }
    }
}

impl Config {
    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(short_env())
            .merge(Env::prefixed("RACE_ENGINEER_").split("__"));

        let mut config: Config = figment.extract()?;
        if std::env::var_os(NO_LLM_ENV).is_some_and(|v| !v.is_empty()) {
            config.llm.enabled = false;
        }
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.kb.chunk_size == 0 {
            return Err(invalid("kb.chunk_size must be greater than 0"));
        }
        if self.kb.chunk_overlap >= self.kb.chunk_size {
            return Err(invalid(format!(
                "kb.chunk_overlap ({}) must be smaller than kb.chunk_size ({})",
                self.kb.chunk_overlap, self.kb.chunk_size
            )));
        }
        if self.kb.top_k == 0 {
            return Err(invalid("kb.top_k must be greater than 0"));
        }
        if self.llm.max_iterations == 0 {
            return Err(invalid("llm.max_iterations must be greater than 0"));
        }
        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs must be greater than 0"));
        }
        if !(self.strategy.pit_loss_s >= 0.0) {
            return Err(invalid("strategy.pit_loss_s must not be negative"));
        }
        if !(self.strategy.degradation_threshold_s >= 0.0) {
            return Err(invalid(
                "strategy.degradation_threshold_s must not be negative",
            ));
        }
        if self.strategy.min_fit_laps < 2 {
            return Err(invalid("strategy.min_fit_laps must be at least 2"));
        }
        if self.strategy.defender_tail_laps < self.strategy.min_fit_laps {
            return Err(invalid(format!(
                "strategy.defender_tail_laps ({}) cannot be smaller than strategy.min_fit_laps ({})",
                self.strategy.defender_tail_laps, self.strategy.min_fit_laps
            )));
        }
        for (key, url) in [
            ("openf1.base_url", &self.openf1.base_url),
            ("llm.base_url", &self.llm.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(format!("{key} must be an http(s) URL: {url}")));
            }
        }
        if let Err(e) = glob::Pattern::new(&self.kb.glob) {
            return Err(invalid(format!("invalid kb.glob pattern {}: {e}", self.kb.glob)));
        }
        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the HTTP request timeout as a Duration.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

/// Short environment variables understood alongside the prefixed ones.
fn short_env() -> Env {
    Env::raw()
        .only(&["OLLAMA_MODEL", "OLLAMA_BASE_URL", "KB_DIR"])
        .map(|key| {
            let key = key.as_str();
            if key.eq_ignore_ascii_case("OLLAMA_MODEL") {
                "llm.model".into()
            } else if key.eq_ignore_ascii_case("OLLAMA_BASE_URL") {
                "llm.base_url".into()
            } else {
                "kb.dir".into()
            }
        })
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
