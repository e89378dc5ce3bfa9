// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Redis broker.
//!
//! Key layout under a configurable prefix (`trenova:jobs` by default):
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `{p}:task:{id}` | string | JSON task record |
//! | `{p}:queue:{queue}` | sorted set | pending ids scored by priority, then enqueue time |
//! | `{p}:scheduled` | sorted set | ids scored by process time (unix ms) |
//! | `{p}:retry` | sorted set | ids scored by next attempt (unix ms) |
//! | `{p}:active` | sorted set | leased ids scored by lease deadline (unix ms) |
//! | `{p}:archived:{queue}` | list | newest archived ids, capped |
//! | `{p}:result:{id}` | string | handler result, expires with retention |
//! | `{p}:unique:{type}:{key}` | string | id holding the lock, `SET NX EX 3600` |
//!
//! Every move of an id between sets runs as one Lua script that only acts
//! when the id is still in its source set, so two forwarders, two recoverers
//! or a recoverer racing a late settle never both move the same task.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::{
    ARCHIVE_RETENTION, BrokerStats, JobBroker, LEASE_GRACE, MAX_ARCHIVED_PER_QUEUE, QueueDepth,
    reclaimed, unique_lock,
};
use crate::error::{JobError, Result};
use crate::server::DEFAULT_TASK_TIMEOUT;
use crate::task::{Task, TaskInfo, TaskState};
use crate::types::{Queue, UNIQUE_TTL};

/// Pop the best id and lease it in one step.
///
/// KEYS: queue, active set. ARGV: task key prefix, now (ms), default handler
/// limit (ms), lease grace (ms). Returns nil when the queue is empty, `{id}`
/// when the record is gone and `{id, record}` otherwise. The lease matches
/// [`Task::lease_deadline`].
static DEQUEUE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
  return false
end
local id = popped[1]
local raw = redis.call('GET', ARGV[1] .. id)
if not raw then
  return {id}
end
local timeout = tonumber(ARGV[3])
local ok, task = pcall(cjson.decode, raw)
if ok and type(task.options) == 'table' and type(task.options.timeout) == 'number' then
  timeout = task.options.timeout * 1000
end
redis.call('ZADD', KEYS[2], tonumber(ARGV[2]) + timeout + tonumber(ARGV[4]), id)
return {id, raw}
",
    )
});

/// Move an id from a sorted set into a queue, rewriting its record.
///
/// KEYS: source set, task key, target queue. ARGV: id, record, queue score.
/// Returns 0 without writing when the id already left the source set.
static MOVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('SET', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
return 1
",
    )
});

/// Move an id from the active set into an archive list.
///
/// KEYS: active set, task key, archive list. ARGV: id, record, record TTL
/// (s), list cap.
static MOVE_TO_ARCHIVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
redis.call('LPUSH', KEYS[3], ARGV[1])
redis.call('LTRIM', KEYS[3], 0, tonumber(ARGV[4]) - 1)
return 1
",
    )
});

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "trenova:jobs";

/// Ids moved per set per forward or recovery pass.
const BATCH: isize = 100;

/// Broker backed by Redis sorted sets.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisBroker {
    /// Connect to `url` using the default key prefix.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_prefix(url, DEFAULT_PREFIX).await
    }

    /// Connect to `url`, namespacing every key under `prefix`.
    pub async fn connect_with_prefix(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let prefix = prefix.into();
        info!(prefix = %prefix, "Connected to Redis job broker");
        Ok(Self { conn, prefix })
    }

    fn task_key(&self, id: &str) -> String {
        format!("{}:task:{}", self.prefix, id)
    }

    fn queue_key(&self, queue: Queue) -> String {
        format!("{}:queue:{}", self.prefix, queue.as_str())
    }

    fn scheduled_key(&self) -> String {
        format!("{}:scheduled", self.prefix)
    }

    fn retry_key(&self) -> String {
        format!("{}:retry", self.prefix)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.prefix)
    }

    fn archived_key(&self, queue: Queue) -> String {
        format!("{}:archived:{}", self.prefix, queue.as_str())
    }

    fn result_key(&self, id: &str) -> String {
        format!("{}:result:{}", self.prefix, id)
    }

    fn unique_key(&self, lock: &str) -> String {
        format!("{}:unique:{}", self.prefix, lock)
    }

    async fn load(&self, id: &str) -> Result<Option<Task>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.task_key(id))
            .query_async(&mut conn)
            .await?;
        raw.map(|r| serde_json::from_str(&r).map_err(JobError::from))
            .transpose()
    }

    async fn release_unique(&self, task: &Task) -> Result<()> {
        let Some(lock) = unique_lock(task) else {
            return Ok(());
        };
        let key = self.unique_key(&lock);
        let mut conn = self.conn.clone();
        let holder: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        if holder.as_deref() == Some(task.id.as_str()) {
            let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
        }
        Ok(())
    }

    async fn due_ids(&self, set: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(set)
            .arg("-inf")
            .arg(now.timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(BATCH)
            .query_async(&mut conn)
            .await?;
        Ok(due)
    }

    async fn drop_id(&self, set: &str, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        debug!(task_id = %id, set = %set, "Dropping id without a task record");
        let _: () = redis::cmd("ZREM").arg(set).arg(id).query_async(&mut conn).await?;
        Ok(())
    }

    /// Returns whether the id was still in `set` and has been moved.
    async fn move_to_queue(&self, set: &str, task: &Task) -> Result<bool> {
        let mut conn = self.conn.clone();
        let moved: i64 = MOVE
            .key(set)
            .key(self.task_key(&task.id))
            .key(self.queue_key(task.queue()))
            .arg(&task.id)
            .arg(serde_json::to_string(task)?)
            .arg(task.queue_score())
            .invoke_async(&mut conn)
            .await?;
        Ok(moved == 1)
    }

    async fn forward_set(&self, set: String, now: DateTime<Utc>) -> Result<usize> {
        let mut forwarded = 0;
        for id in self.due_ids(&set, now).await? {
            let Some(mut task) = self.load(&id).await? else {
                self.drop_id(&set, &id).await?;
                continue;
            };
            task.state = TaskState::Pending;
            if self.move_to_queue(&set, &task).await? {
                forwarded += 1;
            }
        }
        Ok(forwarded)
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn enqueue(&self, mut task: Task) -> Result<TaskInfo> {
        let mut conn = self.conn.clone();

        if let Some(lock) = unique_lock(&task) {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(self.unique_key(&lock))
                .arg(&task.id)
                .arg("NX")
                .arg("EX")
                .arg(UNIQUE_TTL.as_secs())
                .query_async(&mut conn)
                .await?;
            if acquired.is_none() {
                return Err(JobError::Duplicate(lock));
            }
        }

        let scheduled = task.process_at > Utc::now();
        task.state = if scheduled {
            TaskState::Scheduled
        } else {
            TaskState::Pending
        };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(self.task_key(&task.id))
            .arg(serde_json::to_string(&task)?)
            .ignore();
        if scheduled {
            pipe.cmd("ZADD")
                .arg(self.scheduled_key())
                .arg(task.process_at.timestamp_millis())
                .arg(&task.id)
                .ignore();
        } else {
            pipe.cmd("ZADD")
                .arg(self.queue_key(task.queue()))
                .arg(task.queue_score())
                .arg(&task.id)
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(task.info())
    }

    async fn dequeue(&self, queue: Queue) -> Result<Option<Task>> {
        let mut conn = self.conn.clone();
        let task_prefix = format!("{}:task:", self.prefix);
        loop {
            let popped: Option<Vec<String>> = DEQUEUE
                .key(self.queue_key(queue))
                .key(self.active_key())
                .arg(&task_prefix)
                .arg(Utc::now().timestamp_millis())
                .arg(DEFAULT_TASK_TIMEOUT.as_millis() as u64)
                .arg(LEASE_GRACE.as_millis() as u64)
                .invoke_async(&mut conn)
                .await?;
            let Some(popped) = popped else {
                return Ok(None);
            };
            let mut fields = popped.into_iter();
            let id = fields.next().unwrap_or_default();
            let Some(raw) = fields.next() else {
                debug!(task_id = %id, queue = %queue, "Dropping queued id without a task record");
                continue;
            };
            let mut task: Task = serde_json::from_str(&raw)?;
            task.state = TaskState::Active;
            let _: () = redis::cmd("SET")
                .arg(self.task_key(&task.id))
                .arg(serde_json::to_string(&task)?)
                .query_async(&mut conn)
                .await?;
            return Ok(Some(task));
        }
    }

    async fn forward_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let scheduled = self.forward_set(self.scheduled_key(), now).await?;
        let retry = self.forward_set(self.retry_key(), now).await?;
        Ok(scheduled + retry)
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let active = self.active_key();
        let mut conn = self.conn.clone();
        let mut recovered = 0;
        for id in self.due_ids(&active, now).await? {
            let Some(task) = self.load(&id).await? else {
                self.drop_id(&active, &id).await?;
                continue;
            };
            let task = reclaimed(&task);
            let moved = if task.state == TaskState::Pending {
                self.move_to_queue(&active, &task).await?
            } else {
                let moved: i64 = MOVE_TO_ARCHIVE
                    .key(&active)
                    .key(self.task_key(&task.id))
                    .key(self.archived_key(task.queue()))
                    .arg(&task.id)
                    .arg(serde_json::to_string(&task)?)
                    .arg(ARCHIVE_RETENTION.as_secs())
                    .arg(MAX_ARCHIVED_PER_QUEUE)
                    .invoke_async(&mut conn)
                    .await?;
                if moved == 1 {
                    self.release_unique(&task).await?;
                }
                moved == 1
            };
            if moved {
                debug!(task_id = %task.id, state = task.state.as_str(), "Reclaimed task from expired lease");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn complete(&self, task: &Task, result: &str) -> Result<()> {
        let mut done = task.clone();
        done.state = TaskState::Completed;
        let ttl = task.options.retention.as_secs().max(1);
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(self.task_key(&done.id))
            .arg(serde_json::to_string(&done)?)
            .arg("EX")
            .arg(ttl)
            .ignore()
            .cmd("SET")
            .arg(self.result_key(&done.id))
            .arg(result)
            .arg("EX")
            .arg(ttl)
            .ignore()
            .cmd("ZREM")
            .arg(self.active_key())
            .arg(&done.id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        self.release_unique(&done).await
    }

    async fn retry(&self, task: &Task, error: &str, process_at: DateTime<Utc>) -> Result<()> {
        let mut retry = task.clone();
        retry.state = TaskState::Retry;
        retry.retried += 1;
        retry.last_error = Some(error.to_string());
        retry.process_at = process_at;
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(self.task_key(&retry.id))
            .arg(serde_json::to_string(&retry)?)
            .ignore()
            .cmd("ZADD")
            .arg(self.retry_key())
            .arg(process_at.timestamp_millis())
            .arg(&retry.id)
            .ignore()
            .cmd("ZREM")
            .arg(self.active_key())
            .arg(&retry.id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn archive(&self, task: &Task, error: &str) -> Result<()> {
        let mut dead = task.clone();
        dead.state = TaskState::Archived;
        dead.last_error = Some(error.to_string());
        let archived = self.archived_key(dead.queue());
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(self.task_key(&dead.id))
            .arg(serde_json::to_string(&dead)?)
            .arg("EX")
            .arg(ARCHIVE_RETENTION.as_secs())
            .ignore()
            .cmd("LPUSH")
            .arg(&archived)
            .arg(&dead.id)
            .ignore()
            .cmd("LTRIM")
            .arg(&archived)
            .arg(0)
            .arg(MAX_ARCHIVED_PER_QUEUE as isize - 1)
            .ignore()
            .cmd("ZREM")
            .arg(self.active_key())
            .arg(&dead.id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        self.release_unique(&dead).await
    }

    async fn cancel(&self, task_id: &str) -> Result<bool> {
        let Some(task) = self.load(task_id).await? else {
            return Ok(false);
        };
        let set = match task.state {
            TaskState::Pending => self.queue_key(task.queue()),
            TaskState::Scheduled => self.scheduled_key(),
            TaskState::Retry => self.retry_key(),
            _ => return Ok(false),
        };
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("ZREM")
            .arg(&set)
            .arg(task_id)
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Ok(false);
        }
        let _: () = redis::cmd("DEL")
            .arg(self.task_key(task_id))
            .query_async(&mut conn)
            .await?;
        self.release_unique(&task).await?;
        Ok(true)
    }

    async fn task_info(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        Ok(self.load(task_id).await?.map(|t| t.info()))
    }

    async fn result(&self, task_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("GET")
            .arg(self.result_key(task_id))
            .query_async(&mut conn)
            .await?;
        Ok(result)
    }

    async fn stats(&self) -> Result<BrokerStats> {
        let mut conn = self.conn.clone();
        let mut queues = Vec::with_capacity(Queue::ALL.len());
        for queue in Queue::ALL {
            let pending: u64 = redis::cmd("ZCARD")
                .arg(self.queue_key(queue))
                .query_async(&mut conn)
                .await?;
            let archived: u64 = redis::cmd("LLEN")
                .arg(self.archived_key(queue))
                .query_async(&mut conn)
                .await?;
            queues.push(QueueDepth {
                queue,
                pending,
                archived,
            });
        }
        let scheduled: u64 = redis::cmd("ZCARD")
            .arg(self.scheduled_key())
            .query_async(&mut conn)
            .await?;
        let retry: u64 = redis::cmd("ZCARD")
            .arg(self.retry_key())
            .query_async(&mut conn)
            .await?;
        let active: u64 = redis::cmd("ZCARD")
            .arg(self.active_key())
            .query_async(&mut conn)
            .await?;
        Ok(BrokerStats {
            queues,
            scheduled,
            retry,
            active,
        })
    }
}
