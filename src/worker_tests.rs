use std::collections::HashMap;
use std::sync::atomic::AtomicU32;

use async_trait::async_trait;

use super::*;
use crate::store::MemoryTaskStore;

struct ComputeHandler;

#[async_trait]
impl TaskHandler for ComputeHandler {
    async fn handle(&self, task: &Task) -> Result<String, HandlerError> {
        let a = task.params.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
        let b = task.params.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok((a + b).to_string())
    }
}

struct FailingHandler {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl TaskHandler for FailingHandler {
    async fn handle(&self, _task: &Task) -> Result<String, HandlerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::new("boom", "always fails"))
    }
}

struct CountingHandler {
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl TaskHandler for CountingHandler {
    async fn handle(&self, _task: &Task) -> Result<String, HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("done".to_string())
    }
}

struct PanicHandler;

#[async_trait]
impl TaskHandler for PanicHandler {
    async fn handle(&self, _task: &Task) -> Result<String, HandlerError> {
        panic!("kaboom");
    }
}

fn test_config(max_workers: u32, max_retries: u32) -> QueueConfig {
    QueueConfig {
        max_workers,
        max_retries,
        poll_interval_ms: 10,
        ..QueueConfig::default()
    }
}

fn memory_queue() -> Arc<TaskQueue> {
    Arc::new(TaskQueue::with_store(Arc::new(MemoryTaskStore::new())))
}

fn compute_params(a: i64, b: i64) -> HashMap<String, serde_json::Value> {
    let mut params = HashMap::new();
    params.insert("a".to_string(), serde_json::json!(a));
    params.insert("b".to_string(), serde_json::json!(b));
    params
}

async fn wait_for_terminal(queue: &TaskQueue, id: &str) -> Task {
    for _ in 0..500 {
        if let Some(task) = queue.get(id).await.unwrap() {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached a terminal status", id);
}

#[tokio::test]
async fn test_compute_task_completes() {
    let queue = memory_queue();
    let mut registry = HandlerRegistry::new();
    registry.register("compute", Arc::new(ComputeHandler));

    let task = Task::new("compute", compute_params(2, 3)).with_id("task-1");
    queue.add(&task).await.unwrap();

    let mut pool = WorkerPool::new(test_config(1, 3));
    pool.start(queue.clone(), Arc::new(registry));

    let done = wait_for_terminal(&queue, "task-1").await;
    pool.shutdown().await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("5"));
    assert!(done.error.is_none());
    assert_eq!(done.retry_count, 0);
    assert_eq!(pool.tasks_completed(), 1);
    assert_eq!(pool.tasks_failed(), 0);
}

#[tokio::test]
async fn test_failing_task_exhausts_retries() {
    let queue = memory_queue();
    let attempts = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(
        "flaky",
        Arc::new(FailingHandler {
            attempts: attempts.clone(),
        }),
    );

    let task = Task::new("flaky", HashMap::new()).with_id("task-2");
    queue.add(&task).await.unwrap();

    let mut pool = WorkerPool::new(test_config(1, 2));
    pool.start(queue.clone(), Arc::new(registry));

    let done = wait_for_terminal(&queue, "task-2").await;
    pool.shutdown().await.unwrap();

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.retry_count, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let error = done.error.unwrap();
    assert!(error.contains("boom"));
    assert!(error.contains("always fails"));
    assert!(done.result.is_none());
    assert_eq!(pool.tasks_failed(), 1);
}

#[tokio::test]
async fn test_single_task_executed_once_by_two_workers() {
    let queue = memory_queue();
    let invocations = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(
        "count",
        Arc::new(CountingHandler {
            invocations: invocations.clone(),
        }),
    );

    let task = Task::new("count", HashMap::new()).with_id("task-3");
    queue.add(&task).await.unwrap();

    let mut pool = WorkerPool::new(test_config(2, 3));
    pool.start(queue.clone(), Arc::new(registry));

    let done = wait_for_terminal(&queue, "task-3").await;
    // give the losing worker time to poll again
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.shutdown().await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.retry_count, 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(pool.tasks_completed(), 1);
}

#[tokio::test]
async fn test_missing_handler_fails_immediately() {
    let queue = memory_queue();
    let registry = HandlerRegistry::new();

    let task = Task::new("unknown", HashMap::new()).with_id("task-4");
    queue.add(&task).await.unwrap();

    let mut pool = WorkerPool::new(test_config(1, 3));
    pool.start(queue.clone(), Arc::new(registry));

    let done = wait_for_terminal(&queue, "task-4").await;
    pool.shutdown().await.unwrap();

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.retry_count, 0);
    assert!(done.error.unwrap().contains("no handler"));
    assert_eq!(pool.tasks_failed(), 1);
}

#[tokio::test]
async fn test_panicking_handler_does_not_kill_the_worker() {
    let queue = memory_queue();
    let mut registry = HandlerRegistry::new();
    registry.register("explode", Arc::new(PanicHandler));
    registry.register("compute", Arc::new(ComputeHandler));

    queue
        .add(&Task::new("explode", HashMap::new()).with_id("task-5"))
        .await
        .unwrap();

    let mut pool = WorkerPool::new(test_config(1, 1));
    pool.start(queue.clone(), Arc::new(registry));

    let exploded = wait_for_terminal(&queue, "task-5").await;
    assert_eq!(exploded.status, TaskStatus::Failed);
    assert!(exploded.error.unwrap().contains("panic"));

    // the same worker keeps processing afterwards
    queue
        .add(&Task::new("compute", compute_params(1, 1)).with_id("task-6"))
        .await
        .unwrap();
    let done = wait_for_terminal(&queue, "task-6").await;
    pool.shutdown().await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_retry_then_success_leaves_retry_count() {
    struct FlakyOnce {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TaskHandler for FlakyOnce {
        async fn handle(&self, _task: &Task) -> Result<String, HandlerError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(HandlerError::new("transient", "first attempt fails"))
            } else {
                Ok("recovered".to_string())
            }
        }
    }

    let queue = memory_queue();
    let attempts = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(
        "flaky-once",
        Arc::new(FlakyOnce {
            attempts: attempts.clone(),
        }),
    );

    queue
        .add(&Task::new("flaky-once", HashMap::new()).with_id("task-7"))
        .await
        .unwrap();

    let mut pool = WorkerPool::new(test_config(1, 3));
    pool.start(queue.clone(), Arc::new(registry));

    let done = wait_for_terminal(&queue, "task-7").await;
    pool.shutdown().await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("recovered"));
    assert_eq!(done.retry_count, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_standalone_worker_run_and_shutdown() {
    let queue = memory_queue();
    let mut registry = HandlerRegistry::new();
    registry.register("compute", Arc::new(ComputeHandler));

    queue
        .add(&Task::new("compute", compute_params(4, 4)).with_id("task-8"))
        .await
        .unwrap();

    let worker = Worker::new(1, queue.clone(), Arc::new(registry), &test_config(1, 3));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    let done = wait_for_terminal(&queue, "task-8").await;
    assert_eq!(done.result.as_deref(), Some("8"));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_pool_shutdown_stops_workers() {
    let queue = memory_queue();
    let mut pool = WorkerPool::new(test_config(3, 3));
    pool.start(queue, Arc::new(HandlerRegistry::new()));
    assert!(pool.is_running());

    pool.shutdown().await.unwrap();
    assert!(!pool.is_running());
}

#[tokio::test]
async fn test_recovery_after_simulated_crash() {
    let queue = memory_queue();
    queue
        .add(&Task::new("compute", compute_params(3, 4)).with_id("task-9"))
        .await
        .unwrap();

    // a crashed worker leaves the task claimed but unfinished
    assert!(queue.claim("task-9").await.unwrap());
    assert_eq!(queue.reset_running().await.unwrap(), 1);

    let mut registry = HandlerRegistry::new();
    registry.register("compute", Arc::new(ComputeHandler));
    let mut pool = WorkerPool::new(test_config(1, 3));
    pool.start(queue.clone(), Arc::new(registry));

    let done = wait_for_terminal(&queue, "task-9").await;
    pool.shutdown().await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("7"));
}
