use crate::ingestor::{IngestOptions, RetryPolicy};
use crate::observability::LogLevel;
use crate::runtime::SchedulerConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Operator-facing pipeline configuration, loaded from a JSON file.
///
/// Validation runs once at startup; nothing else is constructed until it
/// passes, so a bad knob fails the process fast instead of at first use.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub source_endpoint: String,
    pub sink_endpoint: String,
    #[serde(default)]
    pub source_token: Option<String>,
    #[serde(default)]
    pub sink_token: Option<String>,
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "defaults::backoff_multiplier")]
    pub backoff_multiplier: u64,
    #[serde(default = "defaults::backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "defaults::max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "defaults::worker_count")]
    pub worker_count: usize,
    #[serde(default = "defaults::error_backoff_base_ms")]
    pub error_backoff_base_ms: u64,
    #[serde(default = "defaults::error_backoff_cap_ms")]
    pub error_backoff_cap_ms: u64,
    #[serde(default = "defaults::pass_interval_ms")]
    pub pass_interval_ms: u64,
    #[serde(default = "defaults::checkpoint_db_path")]
    pub checkpoint_db_path: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

mod defaults {
    pub fn request_timeout_ms() -> u64 {
        10_000
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn backoff_base_ms() -> u64 {
        250
    }
    pub fn backoff_multiplier() -> u64 {
        2
    }
    pub fn backoff_cap_ms() -> u64 {
        10_000
    }
    pub fn max_batch_size() -> usize {
        128
    }
    pub fn worker_count() -> usize {
        4
    }
    pub fn error_backoff_base_ms() -> u64 {
        5_000
    }
    pub fn error_backoff_cap_ms() -> u64 {
        300_000
    }
    pub fn pass_interval_ms() -> u64 {
        2_000
    }
    pub fn checkpoint_db_path() -> String {
        "tapline.db".to_string()
    }
    pub fn log_level() -> String {
        "info".to_string()
    }
}

/// Errors surfaced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    /// Loads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parses and validates a config document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every knob; the first violation fails the whole config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("source_endpoint must not be empty".into()));
        }
        if self.sink_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("sink_endpoint must not be empty".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be positive".into()));
        }
        if self.backoff_multiplier == 0 {
            return Err(ConfigError::Invalid("backoff_multiplier must be at least 1".into()));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "backoff_cap_ms must be at least backoff_base_ms".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be positive".into()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be positive".into()));
        }
        if self.pass_interval_ms == 0 {
            return Err(ConfigError::Invalid("pass_interval_ms must be positive".into()));
        }
        if self.checkpoint_db_path.trim().is_empty() {
            return Err(ConfigError::Invalid("checkpoint_db_path must not be empty".into()));
        }
        if LogLevel::parse(&self.log_level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown log_level {:?}",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pass_interval(&self) -> Duration {
        Duration::from_millis(self.pass_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            backoff_multiplier: self.backoff_multiplier,
            backoff_cap_ms: self.backoff_cap_ms,
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            max_batch_size: self.max_batch_size,
            retry: self.retry_policy(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            worker_count: self.worker_count,
            error_backoff_base_ms: self.error_backoff_base_ms,
            error_backoff_cap_ms: self.error_backoff_cap_ms,
        }
    }

    /// Minimum log severity; `validate` guarantees this parses.
    pub fn min_log_level(&self) -> LogLevel {
        LogLevel::parse(&self.log_level).unwrap_or(LogLevel::Info)
    }
}
