// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task brokers.
//!
//! A broker owns the queues. Pending tasks are ordered by priority, then by
//! enqueue time. Tasks with a future process time and tasks waiting for a
//! retry sit in time-ordered sets until [`JobBroker::forward_due`] moves them
//! back into their queue.
//!
//! A dequeued task is leased to its worker until [`Task::lease_deadline`].
//! Settling it releases the lease. A task whose lease runs out is reclaimed by
//! [`JobBroker::recover_expired`] as a failed attempt, so a worker that dies
//! mid-task does not strand it.

mod memory;
mod redis_broker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::task::{Task, TaskInfo, TaskState};
use crate::types::Queue;

pub use self::memory::InMemoryBroker;
pub use self::redis_broker::RedisBroker;

/// Archived ids kept per queue.
pub const MAX_ARCHIVED_PER_QUEUE: usize = 1000;

/// How long archived task records are kept.
pub const ARCHIVE_RETENTION: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 60 * 60);

/// Time past the handler limit before an unsettled task is reclaimed.
pub const LEASE_GRACE: std::time::Duration = std::time::Duration::from_secs(60);

/// Error recorded on a task reclaimed from an expired lease.
pub const LEASE_EXPIRED: &str = "worker lease expired before the task was settled";

/// Depth of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    /// Queue.
    pub queue: Queue,
    /// Tasks waiting to run.
    pub pending: u64,
    /// Tasks failed permanently (capped).
    pub archived: u64,
}

/// Broker-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    /// Per-queue depth, in [`Queue::ALL`] order.
    pub queues: Vec<QueueDepth>,
    /// Tasks waiting for their process time.
    pub scheduled: u64,
    /// Tasks waiting for another attempt.
    pub retry: u64,
    /// Tasks leased to a worker.
    pub active: u64,
}

/// Storage and ordering for tasks.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Store a task. Tasks with a future process time are scheduled.
    ///
    /// Fails with [`JobError::Duplicate`](crate::JobError::Duplicate) while
    /// another task with the same job type and unique key is live.
    async fn enqueue(&self, task: Task) -> Result<TaskInfo>;

    /// Pop the next task from `queue`, marking it active.
    async fn dequeue(&self, queue: Queue) -> Result<Option<Task>>;

    /// Move scheduled and retry tasks due at `now` into their queues.
    async fn forward_due(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Reclaim active tasks whose lease ended before `now`.
    ///
    /// Each counts as a failed attempt: it goes back to its queue while
    /// retries remain and is archived otherwise.
    async fn recover_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Record success and keep `result` for the task's retention.
    async fn complete(&self, task: &Task, result: &str) -> Result<()>;

    /// Record a failed attempt and schedule the next one at `process_at`.
    async fn retry(&self, task: &Task, error: &str, process_at: DateTime<Utc>) -> Result<()>;

    /// Record a permanent failure.
    async fn archive(&self, task: &Task, error: &str) -> Result<()>;

    /// Remove a task that has not started. Returns whether it was removed.
    async fn cancel(&self, task_id: &str) -> Result<bool>;

    /// Look up a task.
    async fn task_info(&self, task_id: &str) -> Result<Option<TaskInfo>>;

    /// Result written by a completed task.
    async fn result(&self, task_id: &str) -> Result<Option<String>>;

    /// Queue depths.
    async fn stats(&self) -> Result<BrokerStats>;

    /// Release connections.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Record written back for a task reclaimed from an expired lease.
pub(crate) fn reclaimed(task: &Task) -> Task {
    let mut task = task.clone();
    task.last_error = Some(LEASE_EXPIRED.to_string());
    if task.can_retry() {
        task.retried += 1;
        task.state = TaskState::Pending;
    } else {
        task.state = TaskState::Archived;
    }
    task
}

/// Key under which a unique task is locked.
pub(crate) fn unique_lock(task: &Task) -> Option<String> {
    task.options
        .unique_key
        .as_ref()
        .filter(|k| !k.is_empty())
        .map(|k| format!("{}:{}", task.job_type.as_str(), k))
}
