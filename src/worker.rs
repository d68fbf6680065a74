//! Worker pool for task execution.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{HandlerError, QueueError};
use crate::handler::{HandlerRegistry, TaskHandler};
use crate::queue::TaskQueue;
use crate::task::{Task, TaskStatus};

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

#[derive(Default)]
struct PoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// A single polling worker.
///
/// Workers share nothing but the queue façade and a process-local
/// claimed-id set; exclusivity comes from the backend's `claim`, the
/// local set only short-circuits claims this process already holds.
pub struct Worker {
    id: u32,
    queue: Arc<TaskQueue>,
    registry: Arc<HandlerRegistry>,
    max_retries: u32,
    poll_interval: Duration,
    claimed: Arc<Mutex<HashSet<String>>>,
    stats: Arc<PoolStats>,
}

impl Worker {
    /// Create a standalone worker.
    pub fn new(
        id: u32,
        queue: Arc<TaskQueue>,
        registry: Arc<HandlerRegistry>,
        config: &QueueConfig,
    ) -> Self {
        Self::with_shared(
            id,
            queue,
            registry,
            config,
            Arc::new(Mutex::new(HashSet::new())),
            Arc::new(PoolStats::default()),
        )
    }

    fn with_shared(
        id: u32,
        queue: Arc<TaskQueue>,
        registry: Arc<HandlerRegistry>,
        config: &QueueConfig,
        claimed: Arc<Mutex<HashSet<String>>>,
        stats: Arc<PoolStats>,
    ) -> Self {
        Self {
            id,
            queue,
            registry,
            max_retries: config.max_retries,
            poll_interval: config.poll_interval(),
            claimed,
            stats,
        }
    }

    /// Poll until the shutdown signal fires.
    ///
    /// A cycle interrupted by shutdown leaves its task in Running for
    /// `reset_running` to recover; no status is written after the signal
    /// is observed.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        debug!("Worker {} started", self.id);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Worker {} stopping", self.id);
                    break;
                }
                _ = self.poll_once() => {}
            }
        }
    }

    /// One poll cycle: fetch a candidate, claim it, execute, report.
    async fn poll_once(&self) {
        let candidates = match self.queue.pending(1).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Worker {}: polling failed: {}", self.id, e);
                tokio::time::sleep(self.poll_interval).await;
                return;
            }
        };

        let Some(task) = candidates.into_iter().next() else {
            tokio::time::sleep(self.poll_interval).await;
            return;
        };

        self.try_claim_and_execute(task).await;
    }

    async fn try_claim_and_execute(&self, task: Task) {
        let id = task.id.clone();
        {
            let mut claimed = self.claimed.lock().await;
            if !claimed.insert(id.clone()) {
                return;
            }
        }

        match self.queue.claim(&id).await {
            Ok(true) => self.execute_claimed(task).await,
            // another worker won the race; not an error
            Ok(false) => debug!("Worker {}: lost claim race for {}", self.id, id),
            Err(e) => warn!("Worker {}: claim failed for {}: {}", self.id, id, e),
        }

        self.claimed.lock().await.remove(&id);
    }

    async fn execute_claimed(&self, mut task: Task) {
        let Some(handler) = self.registry.get(&task.task_type) else {
            warn!(
                "Worker {}: no handler for task type '{}'",
                self.id, task.task_type
            );
            self.stats.failed.fetch_add(1, Ordering::SeqCst);
            let message = format!("no handler registered for task type '{}'", task.task_type);
            if let Err(e) = self
                .queue
                .update_status(&task.id, TaskStatus::Failed, None, Some(message))
                .await
            {
                error!("Worker {}: failed to record failure of {}: {}", self.id, task.id, e);
            }
            return;
        };

        debug!("Worker {} executing task {} ({})", self.id, task.id, task.task_type);
        match run_handler(handler, task.clone()).await {
            Ok(result) => {
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
                debug!("Worker {} completed task {}", self.id, task.id);
                if let Err(e) = self
                    .queue
                    .update_status(&task.id, TaskStatus::Completed, Some(result), None)
                    .await
                {
                    error!("Worker {}: failed to record completion of {}: {}", self.id, task.id, e);
                }
            }
            Err(err) => {
                task.retry_count += 1;
                if task.retry_count < self.max_retries {
                    debug!(
                        "Worker {}: task {} failed (attempt {}), re-queueing: {}",
                        self.id, task.id, task.retry_count, err
                    );
                    task.status = TaskStatus::Pending;
                    task.result = None;
                    task.error = None;
                    task.touch();
                    // upsert re-queue keeps the incremented retry_count
                    if let Err(e) = self.queue.add(&task).await {
                        error!("Worker {}: failed to re-queue {}: {}", self.id, task.id, e);
                    }
                } else {
                    self.stats.failed.fetch_add(1, Ordering::SeqCst);
                    error!(
                        "Worker {}: task {} failed permanently after {} attempts: {}",
                        self.id, task.id, task.retry_count, err
                    );
                    task.status = TaskStatus::Failed;
                    task.result = None;
                    task.error = Some(err.to_string());
                    task.touch();
                    if let Err(e) = self.queue.add(&task).await {
                        error!("Worker {}: failed to record failure of {}: {}", self.id, task.id, e);
                    }
                }
            }
        }
    }
}

/// Run a handler inside its own tokio task so a panic surfaces as a
/// structured failure instead of tearing down the worker loop.
async fn run_handler(handler: Arc<dyn TaskHandler>, task: Task) -> Result<String, HandlerError> {
    let join = tokio::spawn(async move { handler.handle(&task).await });
    match join.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(HandlerError::new("panic", message))
        }
        Err(e) => Err(HandlerError::new("join", e.to_string())),
    }
}

/// Concurrent worker pool.
///
/// Spawns `max_workers` independent polling workers and stops them
/// through a broadcast shutdown signal.
pub struct WorkerPool {
    config: QueueConfig,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    claimed: Arc<Mutex<HashSet<String>>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Create a stopped pool.
    pub fn new(config: QueueConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
            handles: Vec::new(),
            claimed: Arc::new(Mutex::new(HashSet::new())),
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Spawn the configured number of workers polling `queue`.
    pub fn start(&mut self, queue: Arc<TaskQueue>, registry: Arc<HandlerRegistry>) {
        for id in 0..self.config.max_workers {
            let worker = Worker::with_shared(
                id + 1,
                queue.clone(),
                registry.clone(),
                &self.config,
                self.claimed.clone(),
                self.stats.clone(),
            );
            let shutdown = self.shutdown_tx.subscribe();
            self.handles.push(tokio::spawn(worker.run(shutdown)));
        }
        info!("Worker pool started with {} workers", self.config.max_workers);
    }

    /// Whether any worker is still running.
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    /// Tasks completed across the pool.
    pub fn tasks_completed(&self) -> u64 {
        self.stats.completed.load(Ordering::SeqCst)
    }

    /// Tasks failed permanently across the pool, missing handlers included.
    pub fn tasks_failed(&self) -> u64 {
        self.stats.failed.load(Ordering::SeqCst)
    }

    /// Signal shutdown and wait for every worker to stop polling.
    pub async fn shutdown(&mut self) -> Result<(), QueueError> {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles.drain(..) {
            handle
                .await
                .map_err(|e| QueueError::Worker(e.to_string()))?;
        }
        info!("Worker pool stopped");
        Ok(())
    }
}
