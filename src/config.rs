//! Queue configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Storage backend selector.
///
/// A closed set: a tag outside it fails at parse time instead of falling
/// back to a default backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local storage, lost on exit.
    Memory,
    /// Single-node persistent storage (SQLite).
    Sqlite,
    /// Distributed storage over a shared Redis instance.
    Redis,
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Which storage backend to construct.
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Database path for the sqlite backend.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Connection URL for the redis backend.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Number of concurrent workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    /// Maximum attempts for failing tasks.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Idle wait between polls when nothing is pending, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_backend() -> BackendKind {
    BackendKind::Memory
}

fn default_max_workers() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: None,
            redis_url: None,
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl QueueConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| QueueError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, QueueError> {
        toml::from_str(content).map_err(|e| QueueError::Config(e.to_string()))
    }

    /// Idle wait between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
