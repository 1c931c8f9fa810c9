//! Store configuration model.
//!
//! # Responsibility
//! - Describe where the database lives and how the background runtime is sized.
//! - Load configuration from JSON with every field defaulted.
//!
//! # Invariants
//! - Executor pool size, queue capacity and delivery thread count are never
//!   zero after `validate()`.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_POOL_SIZE: usize = 2;
const DEFAULT_QUEUE_CAPACITY: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 100;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DISPATCHER_THREAD_NAME: &str = "tablewatch-dispatch";
const DEFAULT_DELIVERY_THREADS: usize = 2;

/// Configuration loading/validation error.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid store config: {err}"),
            Self::Invalid(message) => write!(f, "invalid store config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Physical location of the SQLite database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseLocation {
    #[default]
    Memory,
    File {
        path: PathBuf,
    },
}

/// Sizing for the bounded background executor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker threads.
    pub pool_size: usize,
    /// Tasks that may wait in the queue before submission is deferred.
    pub queue_capacity: usize,
    /// Delay before a rejected task is offered to the queue again.
    pub retry_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl ExecutorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "executor.pool_size must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "executor.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: DatabaseLocation,
    pub busy_timeout_ms: u64,
    pub executor: ExecutorConfig,
    /// Name prefix of the observer delivery threads.
    pub dispatcher_thread_name: String,
    /// Observer delivery threads shared by all subscriptions.
    pub delivery_threads: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: DatabaseLocation::Memory,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            executor: ExecutorConfig::default(),
            dispatcher_thread_name: DEFAULT_DISPATCHER_THREAD_NAME.to_string(),
            delivery_threads: DEFAULT_DELIVERY_THREADS,
        }
    }
}

impl StoreConfig {
    /// In-memory database with default runtime sizing.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed database with default runtime sizing.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseLocation::File { path: path.into() },
            ..Self::default()
        }
    }

    /// Parses and validates a JSON config document.
    ///
    /// # Errors
    /// - Returns `Parse` for malformed JSON or unknown location kinds.
    /// - Returns `Invalid` when a sizing field is zero or a name is blank.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor.validate()?;
        if self.dispatcher_thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "dispatcher_thread_name cannot be empty".to_string(),
            ));
        }
        if self.delivery_threads == 0 {
            return Err(ConfigError::Invalid(
                "delivery_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
