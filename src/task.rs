//! Task definition and status.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Exclusively claimed by one worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed permanently.
    Failed,
}

impl TaskStatus {
    /// Stable string form used by the persistent backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Whether no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work.
///
/// The storage backend owns the durable record; a worker holds only a
/// transient working copy while executing a claimed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique ID, immutable once created. Re-adding a task with an
    /// existing ID overwrites the record (upsert).
    pub id: String,
    /// Selects the handler that processes this task.
    pub task_type: String,
    /// Handler-specific payload.
    pub params: HashMap<String, serde_json::Value>,
    /// Current status.
    pub status: TaskStatus,
    /// Result string, set only on completion.
    pub result: Option<String>,
    /// Error description, set only on permanent failure.
    pub error: Option<String>,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task with a generated ID.
    pub fn new(task_type: impl Into<String>, params: HashMap<String, serde_json::Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            params,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pin a caller-chosen ID instead of the generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new() {
        let task = Task::new("download", HashMap::new());
        assert!(!task.id.is_empty());
        assert_eq!(task.task_type, "download");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_with_id() {
        let task = Task::new("compute", HashMap::new()).with_id("task-1");
        assert_eq!(task.id, "task-1");
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("dead_letter"), None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut params = HashMap::new();
        params.insert("url".to_string(), serde_json::json!("http://example.com"));
        params.insert("size".to_string(), serde_json::json!(42));

        let mut task = Task::new("download", params).with_id("task-7");
        task.retry_count = 2;
        task.status = TaskStatus::Failed;
        task.error = Some("timeout: connect".to_string());

        let json = serde_json::to_string(&task).unwrap();
        let loaded: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, task);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
