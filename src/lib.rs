//! # DispatchQ
//!
//! Pluggable task queue with a concurrent worker scheduler.
//!
//! ## Features
//!
//! - Swappable storage backends (in-memory, SQLite, Redis)
//! - Backend-level atomic task claiming
//! - Worker pool with retry and crash recovery
//! - Handler registry keyed by task type
//!
//! Producers enqueue [`Task`]s through the [`TaskQueue`] façade; workers
//! poll the façade, claim tasks exclusively, and run the handler
//! registered for the task's type, reporting the outcome back through
//! the same façade.

pub mod config;
pub mod error;
pub mod handler;
pub mod queue;
pub mod store;
pub mod task;
pub mod worker;

pub use config::{BackendKind, QueueConfig};
pub use error::{HandlerError, QueueError};
pub use handler::{HandlerRegistry, TaskHandler};
pub use queue::TaskQueue;
#[cfg(feature = "redis")]
pub use store::RedisTaskStore;
pub use store::{MemoryTaskStore, QueueStats, SqliteTaskStore, TaskStore};
pub use task::{Task, TaskStatus};
pub use worker::{Worker, WorkerPool};
