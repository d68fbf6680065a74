//! In-memory task store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::QueueError;
use crate::store::{QueueStats, TaskStore};
use crate::task::{Task, TaskStatus};

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    /// Pending IDs in arrival order; entries whose task is no longer
    /// Pending are filtered on read.
    pending_order: Vec<String>,
}

/// Ephemeral task store.
///
/// Records live in a process-local table plus an explicit pending-order
/// list and are lost when the store is dropped. `claim` is a write-locked
/// check-and-flip, so exclusivity holds for every task in this process.
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn add(&self, task: &Task) -> Result<(), QueueError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if task.status == TaskStatus::Pending && !inner.pending_order.iter().any(|p| p == &task.id)
        {
            inner.pending_order.push(task.id.clone());
        }
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Task>, QueueError> {
        let inner = self.inner.read().await;
        let tasks = inner
            .pending_order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Pending)
            .take(limit)
            .cloned()
            .collect();
        Ok(tasks)
    }

    async fn claim(&self, id: &str) -> Result<bool, QueueError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(task) = inner.tasks.get_mut(id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        task.status = TaskStatus::Running;
        task.touch();
        inner.pending_order.retain(|p| p != id);
        debug!("Claimed task {}", id);
        Ok(true)
    }

    async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(task) = inner.tasks.get_mut(id) else {
            return Ok(());
        };
        task.status = status;
        task.result = result;
        task.error = error;
        task.touch();

        if status == TaskStatus::Pending {
            if !inner.pending_order.iter().any(|p| p == id) {
                inner.pending_order.push(id.to_string());
            }
        } else {
            inner.pending_order.retain(|p| p != id);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, QueueError> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.get(id).cloned())
    }

    async fn reset_running(&self) -> Result<u64, QueueError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let mut count = 0;
        for task in inner.tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
                task.touch();
                if !inner.pending_order.iter().any(|p| p == &task.id) {
                    inner.pending_order.push(task.id.clone());
                }
                count += 1;
            }
        }
        if count > 0 {
            debug!("Reset {} running tasks to pending", count);
        }
        Ok(count)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let inner = self.inner.read().await;
        let mut stats = QueueStats::default();
        for task in inner.tasks.values() {
            stats.record(task.status);
        }
        Ok(stats)
    }
}
