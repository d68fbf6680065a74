//! Queue errors.

use thiserror::Error;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Worker pool failure.
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Structured handler failure: a classification plus a message.
///
/// Retry decisions are made on this type, never by matching error text.
/// A terminal failure is recorded on the task's `error` field in the
/// `"kind: message"` form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    /// Failure classification, e.g. "timeout" or "invalid-params".
    pub kind: String,
    /// Details of this specific failure.
    pub message: String,
}

impl HandlerError {
    /// Create a new handler error.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
