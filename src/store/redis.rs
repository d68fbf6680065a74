//! Redis task store.
//!
//! Layout in the shared store:
//! - `task:{id}` — one hash per task with the record's fields
//! - `tasks:pending` — sorted set of pending IDs scored by creation time
//! - `tasks:running` — set of claimed IDs
//! - `tasks:ids` — set of all known IDs
//!
//! `claim` and `update_status` run as Lua scripts, so the Pending→Running
//! flip and the set bookkeeping are atomic across independent worker
//! hosts sharing one instance.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::store::{QueueStats, TaskStore};
use crate::task::{Task, TaskStatus};

const PENDING_KEY: &str = "tasks:pending";
const RUNNING_KEY: &str = "tasks:running";
const IDS_KEY: &str = "tasks:ids";

fn task_key(id: &str) -> String {
    format!("task:{id}")
}

fn storage_err(e: redis::RedisError) -> QueueError {
    QueueError::Storage(e.to_string())
}

// KEYS: task hash, pending zset, running set. ARGV: id, updated_at.
const CLAIM_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') == 'pending' then
    redis.call('HSET', KEYS[1], 'status', 'running', 'updated_at', ARGV[2])
    redis.call('ZREM', KEYS[2], ARGV[1])
    redis.call('SADD', KEYS[3], ARGV[1])
    return 1
end
return 0
"#;

// KEYS: task hash, pending zset, running set.
// ARGV: id, status, updated_at, result ('' clears), error ('' clears).
const UPDATE_STATUS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'status', ARGV[2], 'updated_at', ARGV[3])
if ARGV[4] == '' then
    redis.call('HDEL', KEYS[1], 'result')
else
    redis.call('HSET', KEYS[1], 'result', ARGV[4])
end
if ARGV[5] == '' then
    redis.call('HDEL', KEYS[1], 'error')
else
    redis.call('HSET', KEYS[1], 'error', ARGV[5])
end
if ARGV[2] == 'pending' then
    local score = redis.call('HGET', KEYS[1], 'created_ms')
    redis.call('ZADD', KEYS[2], tonumber(score) or 0, ARGV[1])
    redis.call('SREM', KEYS[3], ARGV[1])
else
    redis.call('ZREM', KEYS[2], ARGV[1])
    if ARGV[2] == 'running' then
        redis.call('SADD', KEYS[3], ARGV[1])
    else
        redis.call('SREM', KEYS[3], ARGV[1])
    end
end
return 1
"#;

// KEYS: running set, pending zset. ARGV: updated_at.
const RESET_RUNNING_SCRIPT: &str = r#"
local ids = redis.call('SMEMBERS', KEYS[1])
local count = 0
for _, id in ipairs(ids) do
    local key = 'task:' .. id
    if redis.call('HGET', key, 'status') == 'running' then
        redis.call('HSET', key, 'status', 'pending', 'updated_at', ARGV[1])
        local score = redis.call('HGET', key, 'created_ms')
        redis.call('ZADD', KEYS[2], tonumber(score) or 0, id)
        count = count + 1
    end
    redis.call('SREM', KEYS[1], id)
end
return count
"#;

/// Distributed task store over a shared Redis instance.
pub struct RedisTaskStore {
    conn: ConnectionManager,
}

impl RedisTaskStore {
    /// Connect to the shared store.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(storage_err)?;
        let conn = client.get_connection_manager().await.map_err(storage_err)?;
        debug!("Connected to redis store");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn hash_fields(task: &Task) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("task_type", task.task_type.clone()),
        (
            "params",
            serde_json::to_string(&task.params).unwrap_or_else(|_| "{}".to_string()),
        ),
        ("status", task.status.as_str().to_string()),
        ("retry_count", task.retry_count.to_string()),
        ("created_at", task.created_at.to_rfc3339()),
        ("created_ms", task.created_at.timestamp_millis().to_string()),
        ("updated_at", task.updated_at.to_rfc3339()),
    ];
    if let Some(result) = &task.result {
        fields.push(("result", result.clone()));
    }
    if let Some(error) = &task.error {
        fields.push(("error", error.clone()));
    }
    fields
}

fn task_from_hash(id: &str, map: &HashMap<String, String>) -> Option<Task> {
    let status = TaskStatus::parse(map.get("status")?)?;
    Some(Task {
        id: id.to_string(),
        task_type: map.get("task_type")?.clone(),
        params: map
            .get("params")
            .and_then(|p| serde_json::from_str(p).ok())
            .unwrap_or_default(),
        status,
        result: map.get("result").cloned(),
        error: map.get("error").cloned(),
        retry_count: map.get("retry_count").and_then(|c| c.parse().ok()).unwrap_or(0),
        created_at: parse_timestamp(map.get("created_at")?)?,
        updated_at: parse_timestamp(map.get("updated_at")?)?,
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn add(&self, task: &Task) -> Result<(), QueueError> {
        let mut conn = self.conn();
        let key = task_key(&task.id);
        let fields = hash_fields(task);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields)
            .ignore()
            .sadd(IDS_KEY, &task.id)
            .ignore();
        match task.status {
            TaskStatus::Pending => {
                pipe.zadd(PENDING_KEY, &task.id, task.created_at.timestamp_millis())
                    .ignore()
                    .srem(RUNNING_KEY, &task.id)
                    .ignore();
            }
            TaskStatus::Running => {
                pipe.zrem(PENDING_KEY, &task.id)
                    .ignore()
                    .sadd(RUNNING_KEY, &task.id)
                    .ignore();
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                pipe.zrem(PENDING_KEY, &task.id)
                    .ignore()
                    .srem(RUNNING_KEY, &task.id)
                    .ignore();
            }
        }
        let () = pipe.query_async(&mut conn).await.map_err(storage_err)?;
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Task>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let ids: Vec<String> = conn
            .zrange(PENDING_KEY, 0, limit as isize - 1)
            .await
            .map_err(storage_err)?;

        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            let map: HashMap<String, String> =
                conn.hgetall(task_key(&id)).await.map_err(storage_err)?;
            if map.is_empty() {
                continue;
            }
            match task_from_hash(&id, &map) {
                Some(task) if task.status == TaskStatus::Pending => tasks.push(task),
                Some(_) => {}
                None => warn!("Skipping malformed task record {}", id),
            }
        }
        Ok(tasks)
    }

    async fn claim(&self, id: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let claimed: i64 = redis::Script::new(CLAIM_SCRIPT)
            .key(task_key(id))
            .key(PENDING_KEY)
            .key(RUNNING_KEY)
            .arg(id)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;

        if claimed == 1 {
            debug!("Claimed task {}", id);
        }
        Ok(claimed == 1)
    }

    async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let _: i64 = redis::Script::new(UPDATE_STATUS_SCRIPT)
            .key(task_key(id))
            .key(PENDING_KEY)
            .key(RUNNING_KEY)
            .arg(id)
            .arg(status.as_str())
            .arg(now)
            .arg(result.unwrap_or_default())
            .arg(error.unwrap_or_default())
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, QueueError> {
        let mut conn = self.conn();
        let map: HashMap<String, String> =
            conn.hgetall(task_key(id)).await.map_err(storage_err)?;
        if map.is_empty() {
            return Ok(None);
        }
        match task_from_hash(id, &map) {
            Some(task) => Ok(Some(task)),
            None => {
                warn!("Skipping malformed task record {}", id);
                Ok(None)
            }
        }
    }

    async fn reset_running(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let count: i64 = redis::Script::new(RESET_RUNNING_SCRIPT)
            .key(RUNNING_KEY)
            .key(PENDING_KEY)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;

        if count > 0 {
            debug!("Reset {} running tasks to pending", count);
        }
        Ok(count as u64)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn();
        let ids: Vec<String> = conn.smembers(IDS_KEY).await.map_err(storage_err)?;

        let mut stats = QueueStats::default();
        for id in ids {
            let status: Option<String> = conn
                .hget(task_key(&id), "status")
                .await
                .map_err(storage_err)?;
            if let Some(status) = status.as_deref().and_then(TaskStatus::parse) {
                stats.record(status);
            }
        }
        Ok(stats)
    }
}
