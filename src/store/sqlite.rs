//! SQLite task store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::QueueError;
use crate::store::schema::init_schema;
use crate::store::{QueueStats, TaskStore};
use crate::task::{Task, TaskStatus};

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

const TASK_COLUMNS: &str =
    "id, task_type, params, status, result, error, retry_count, created_at, updated_at";

/// Single-node persistent task store backed by SQLite.
///
/// `claim` is a conditional update whose affected-row count decides the
/// winner, so exclusivity holds across every process sharing the database
/// file.
pub struct SqliteTaskStore {
    conn: Connection,
}

impl SqliteTaskStore {
    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        conn.call(|conn| Ok(init_schema(conn)?))
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Create an in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        conn.call(|conn| Ok(init_schema(conn)?))
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        Ok(Self { conn })
    }
}

fn parse_timestamp(col: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let params_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;

    let status = TaskStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown status '{status_str}'").into(),
        )
    })?;

    Ok(Task {
        id: row.get(0)?,
        task_type: row.get(1)?,
        params: serde_json::from_str(&params_str).unwrap_or_default(),
        status,
        result: row.get(4)?,
        error: row.get(5)?,
        retry_count: row.get(6)?,
        created_at: parse_timestamp(7, &created_str)?,
        updated_at: parse_timestamp(8, &updated_str)?,
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn add(&self, task: &Task) -> Result<(), QueueError> {
        let task = task.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO tasks
                     (id, task_type, params, status, result, error, retry_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        task.id,
                        task.task_type,
                        serde_json::to_string(&task.params).unwrap_or_else(|_| "{}".to_string()),
                        task.status.as_str(),
                        task.result,
                        task.error,
                        task.retry_count,
                        task.created_at.to_rfc3339(),
                        task.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Task>, QueueError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE status = 'pending'
                     ORDER BY created_at ASC
                     LIMIT ?1"
                ))?;
                let tasks = stmt
                    .query_map([limit as i64], task_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(tasks)
            })
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))
    }

    async fn claim(&self, id: &str) -> Result<bool, QueueError> {
        let task_id = id.to_string();
        let now = Utc::now().to_rfc3339();
        let claimed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE tasks SET status = 'running', updated_at = ?2
                     WHERE id = ?1 AND status = 'pending'",
                    params![task_id, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        if claimed {
            debug!("Claimed task {}", id);
        }
        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                // 0 affected rows for an unknown ID: silent no-op
                conn.execute(
                    "UPDATE tasks SET status = ?2, result = ?3, error = ?4, updated_at = ?5
                     WHERE id = ?1",
                    params![id, status.as_str(), result, error, now],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, QueueError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let task = conn.query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    [&id],
                    task_from_row,
                );
                match task {
                    Ok(task) => Ok(Some(task)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))
    }

    async fn reset_running(&self) -> Result<u64, QueueError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE tasks SET status = 'pending', updated_at = ?1
                     WHERE status = 'running'",
                    [now],
                )?;
                Ok(changed as u64)
            })
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        if count > 0 {
            debug!("Reset {} running tasks to pending", count);
        }
        Ok(count)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
                let rows = stmt.query_map([], |row| {
                    let status: String = row.get(0)?;
                    let count: u64 = row.get(1)?;
                    Ok((status, count))
                })?;

                let mut stats = QueueStats::default();
                for row in rows {
                    let (status, count) = row?;
                    stats.total += count;
                    match TaskStatus::parse(&status) {
                        Some(TaskStatus::Pending) => stats.pending = count,
                        Some(TaskStatus::Running) => stats.running = count,
                        Some(TaskStatus::Completed) => stats.completed = count,
                        Some(TaskStatus::Failed) => stats.failed = count,
                        None => {}
                    }
                }
                Ok(stats)
            })
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))
    }
}
