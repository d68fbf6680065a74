//! Task queue façade.

use std::sync::Arc;

use tracing::debug;

use crate::config::{BackendKind, QueueConfig};
use crate::error::QueueError;
use crate::store::{MemoryTaskStore, QueueStats, SqliteTaskStore, TaskStore};
use crate::task::{Task, TaskStatus};

/// Uniform entry point over any storage backend.
///
/// Producers and workers only ever talk to the queue; the backend is
/// selected at construction time and can be swapped without touching
/// their code. The queue performs no business logic of its own.
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
}

impl TaskQueue {
    /// Construct the backend named by the configuration.
    ///
    /// Fails with [`QueueError::Config`] when a required backend
    /// parameter is missing or the backend is not compiled in.
    pub async fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        let store: Arc<dyn TaskStore> = match config.backend {
            BackendKind::Memory => Arc::new(MemoryTaskStore::new()),
            BackendKind::Sqlite => {
                let path = config.db_path.as_ref().ok_or_else(|| {
                    QueueError::Config("sqlite backend requires db_path".to_string())
                })?;
                Arc::new(SqliteTaskStore::open(path).await?)
            }
            #[cfg(feature = "redis")]
            BackendKind::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    QueueError::Config("redis backend requires redis_url".to_string())
                })?;
                Arc::new(crate::store::RedisTaskStore::connect(url).await?)
            }
            #[cfg(not(feature = "redis"))]
            BackendKind::Redis => {
                return Err(QueueError::Config(
                    "redis backend requires the `redis` cargo feature".to_string(),
                ));
            }
        };
        debug!("Constructed {:?} backend", config.backend);
        Ok(Self { store })
    }

    /// Wrap an existing store.
    pub fn with_store(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Enqueue (or overwrite) a task.
    pub async fn add(&self, task: &Task) -> Result<(), QueueError> {
        debug!("Enqueueing task {} ({})", task.id, task.task_type);
        self.store.add(task).await
    }

    /// Up to `limit` pending tasks, oldest first.
    pub async fn pending(&self, limit: usize) -> Result<Vec<Task>, QueueError> {
        self.store.pending(limit).await
    }

    /// Atomically claim a pending task.
    pub async fn claim(&self, id: &str) -> Result<bool, QueueError> {
        self.store.claim(id).await
    }

    /// Update a task's status and optional result/error.
    pub async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        self.store.update_status(id, status, result, error).await
    }

    /// Point lookup.
    pub async fn get(&self, id: &str) -> Result<Option<Task>, QueueError> {
        self.store.get(id).await
    }

    /// Recover tasks orphaned by a crashed worker.
    pub async fn reset_running(&self) -> Result<u64, QueueError> {
        self.store.reset_running().await
    }

    /// Per-status counts.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.store.stats().await
    }
}
