//! # Configuration
//!
//! Layered configuration for queues, workers and logging.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed `TASKER_FLOW`, using `__` as the section separator
//!    (e.g. `TASKER_FLOW__QUEUE__MAX_CONCURRENT=8`)

use crate::constants::defaults;
use crate::error::{Result, TaskerFlowError};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "TASKER_FLOW";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskerFlowConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

/// Execution policy applied by a [`TaskQueue`](crate::queue::TaskQueue)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Upper bound on simultaneously running tasks
    pub max_concurrent: usize,
    /// Retries used by tasks that do not set their own
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Per-attempt timeout used by tasks that do not set their own
    pub timeout_ms: u64,
    /// Order pending tasks by priority rank instead of FIFO
    pub priority_enabled: bool,
    /// Growth factor of the retry delay; `1.0` keeps it fixed
    pub backoff_multiplier: f64,
    pub max_retry_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT,
            max_retries: defaults::MAX_RETRIES,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            timeout_ms: defaults::TIMEOUT_MS,
            priority_enabled: false,
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
            max_retry_delay_ms: defaults::MAX_RETRY_DELAY_MS,
        }
    }
}

impl QueueConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_priority(mut self, priority_enabled: bool) -> Self {
        self.priority_enabled = priority_enabled;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_retry_delay_ms: u64) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_retry_delay_ms = max_retry_delay_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(TaskerFlowError::ConfigurationError(
                "queue.max_concurrent must be greater than 0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(TaskerFlowError::ConfigurationError(
                "queue.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(TaskerFlowError::ConfigurationError(format!(
                "queue.backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Polling behaviour of a [`Worker`](crate::execution::Worker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Initial back-off after the queue reports empty
    pub poll_interval_ms: u64,
    /// Back-off ceiling; the interval doubles on each consecutive empty poll
    pub max_poll_interval_ms: u64,
    /// Capacity of the lifecycle event broadcast channel
    pub event_buffer_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            max_poll_interval_ms: defaults::MAX_POLL_INTERVAL_MS,
            event_buffer_size: defaults::EVENT_BUFFER_SIZE,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TaskerFlowError::ConfigurationError(
                "worker.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(TaskerFlowError::ConfigurationError(format!(
                "worker.max_poll_interval_ms ({}) must not be below poll_interval_ms ({})",
                self.max_poll_interval_ms, self.poll_interval_ms
            )));
        }
        if self.event_buffer_size == 0 {
            return Err(TaskerFlowError::ConfigurationError(
                "worker.event_buffer_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; falls back to `RUST_LOG`, then the environment default
    pub level: Option<String>,
    /// Emit console output as JSON
    pub json: bool,
    /// Directory for the JSON log file; no file output when unset
    pub log_dir: Option<PathBuf>,
}

impl TaskerFlowConfig {
    /// Load defaults, then `path` (if given and present), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&TaskerFlowConfig::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: TaskerFlowConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        self.worker.validate()?;
        Ok(())
    }
}
