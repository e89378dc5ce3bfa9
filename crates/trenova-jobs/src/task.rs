// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task records as stored by a broker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trenova_core::id::{self, new_id};

use crate::broker::LEASE_GRACE;
use crate::error::Result;
use crate::server::DEFAULT_TASK_TIMEOUT;
use crate::types::{JobOptions, JobType, Queue};

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in its queue.
    Pending,
    /// Waiting for its process time.
    Scheduled,
    /// Waiting for its next attempt.
    Retry,
    /// Picked up by a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Failed permanently.
    Archived,
}

impl TaskState {
    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Retry => "retry",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task ID.
    pub id: String,
    /// Handler selector.
    pub job_type: JobType,
    /// JSON payload.
    pub payload: Value,
    /// Options the task was enqueued with.
    pub options: JobOptions,
    /// Lifecycle state.
    pub state: TaskState,
    /// Failed attempts so far.
    pub retried: u32,
    /// Message of the last failure.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the task was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the task may run.
    pub process_at: DateTime<Utc>,
}

impl Task {
    /// Build a task from a serializable payload.
    pub fn new(
        job_type: JobType,
        payload: &impl Serialize,
        options: JobOptions,
        process_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            id: new_id(TASK_PREFIX),
            job_type,
            payload: serde_json::to_value(payload)?,
            options,
            state: TaskState::Pending,
            retried: 0,
            last_error: None,
            enqueued_at: now,
            process_at: process_at.unwrap_or(now),
        })
    }

    /// Job id carried in the payload, falling back to the task id.
    pub fn job_id(&self) -> &str {
        self.payload
            .get("jobId")
            .and_then(Value::as_str)
            .unwrap_or(&self.id)
    }

    /// Target queue.
    pub fn queue(&self) -> Queue {
        self.options.queue
    }

    /// Whether another attempt is allowed after the current failure.
    pub fn can_retry(&self) -> bool {
        self.retried < self.options.max_retry
    }

    /// Whether the deadline has passed.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.options.deadline.is_some_and(|d| now.timestamp() > d)
    }

    /// Time left until the deadline, if one is set.
    pub fn until_deadline(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.options
            .deadline
            .map(|d| Duration::from_secs(d.saturating_sub(now.timestamp()).max(0) as u64))
    }

    /// When a worker's claim on the task lapses if it has not settled it.
    ///
    /// The handler limit plus [`LEASE_GRACE`], counted from `now`.
    pub fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lease = self.options.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT) + LEASE_GRACE;
        chrono::Duration::from_std(lease)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Ordering score inside a queue: higher priority first, then FIFO.
    pub fn queue_score(&self) -> f64 {
        let rank = (100 - self.options.priority.value().clamp(0, 99)) as f64;
        rank * 1e13 + self.enqueued_at.timestamp_millis().max(0) as f64
    }

    /// Public view of the task.
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id.clone(),
            job_id: self.job_id().to_string(),
            job_type: self.job_type,
            queue: self.queue(),
            state: self.state,
            max_retry: self.options.max_retry,
            retried: self.retried,
            last_error: self.last_error.clone(),
            next_process_at: self.process_at,
        }
    }
}

/// What callers get back from enqueue and lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Task ID.
    pub id: String,
    /// Job ID from the payload.
    pub job_id: String,
    /// Job type.
    pub job_type: JobType,
    /// Queue.
    pub queue: Queue,
    /// Lifecycle state.
    pub state: TaskState,
    /// Retry budget.
    pub max_retry: u32,
    /// Failed attempts so far.
    pub retried: u32,
    /// Last failure.
    pub last_error: Option<String>,
    /// Next time the task is eligible to run.
    pub next_process_at: DateTime<Utc>,
}

/// Prefix used for task ids.
pub const TASK_PREFIX: &str = "task";

/// Whether `id` looks like a task id.
pub fn is_task_id(id: &str) -> bool {
    id::prefix_of(id) == Some(TASK_PREFIX)
}
