//! Task storage backends.

mod memory;
#[cfg(feature = "redis")]
mod redis;
mod schema;
mod sqlite;

pub use memory::MemoryTaskStore;
#[cfg(feature = "redis")]
pub use redis::RedisTaskStore;
pub use sqlite::SqliteTaskStore;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::task::{Task, TaskStatus};

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// All known tasks.
    pub total: u64,
    /// Tasks waiting to be claimed.
    pub pending: u64,
    /// Tasks currently claimed by a worker.
    pub running: u64,
    /// Tasks finished successfully.
    pub completed: u64,
    /// Tasks failed permanently.
    pub failed: u64,
}

impl QueueStats {
    /// Fold one observed status into the counters.
    pub(crate) fn record(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}

/// Storage backend contract.
///
/// All synchronization between workers is pushed into the store: `claim`
/// and `update_status` must be atomic with respect to each other per task
/// ID. Workers hold no cross-worker locks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Upsert a task record. Safe to call concurrently from multiple
    /// producers.
    async fn add(&self, task: &Task) -> Result<(), QueueError>;

    /// Up to `limit` pending tasks, oldest first. Read-only; a candidate
    /// returned here still has to be won through `claim`.
    async fn pending(&self, limit: usize) -> Result<Vec<Task>, QueueError>;

    /// Atomically transition a task from Pending to Running, only if it is
    /// still Pending. Returns whether this caller won the claim.
    async fn claim(&self, id: &str) -> Result<bool, QueueError>;

    /// Set status and the optional result/error fields, refreshing
    /// `updated_at`. No-op for unknown IDs.
    async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), QueueError>;

    /// Point lookup.
    async fn get(&self, id: &str) -> Result<Option<Task>, QueueError>;

    /// Transition every Running task back to Pending. Startup recovery for
    /// tasks orphaned by a crashed worker; returns the number reset.
    async fn reset_running(&self) -> Result<u64, QueueError>;

    /// Per-status counts.
    async fn stats(&self) -> Result<QueueStats, QueueError>;
}
