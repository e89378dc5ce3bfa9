// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process broker for tests and single-node development runs.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    ARCHIVE_RETENTION, BrokerStats, JobBroker, MAX_ARCHIVED_PER_QUEUE, QueueDepth, reclaimed,
    unique_lock,
};
use crate::error::{JobError, Result};
use crate::task::{Task, TaskInfo, TaskState};
use crate::types::{Queue, UNIQUE_TTL};

type PendingKey = (i32, i64, u64);

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    expires: HashMap<String, DateTime<Utc>>,
    pending: HashMap<Queue, BTreeMap<PendingKey, String>>,
    delayed: BTreeMap<(DateTime<Utc>, u64), String>,
    active: HashMap<String, DateTime<Utc>>,
    unique: HashMap<String, (String, DateTime<Utc>)>,
    results: HashMap<String, (String, DateTime<Utc>)>,
    archived: HashMap<Queue, VecDeque<String>>,
    seq: u64,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn push_pending(&mut self, mut task: Task) {
        task.state = TaskState::Pending;
        let key = (
            -task.options.priority.value(),
            task.enqueued_at.timestamp_millis(),
            self.next_seq(),
        );
        self.pending
            .entry(task.queue())
            .or_default()
            .insert(key, task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    fn push_delayed(&mut self, task: Task) {
        let key = (task.process_at, self.next_seq());
        self.delayed.insert(key, task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    fn push_archived(&mut self, task: Task, now: DateTime<Utc>) {
        self.release_unique(&task);
        self.expires.insert(task.id.clone(), after(now, ARCHIVE_RETENTION));
        let archived = self.archived.entry(task.queue()).or_default();
        archived.push_front(task.id.clone());
        archived.truncate(MAX_ARCHIVED_PER_QUEUE);
        self.tasks.insert(task.id.clone(), task);
    }

    fn release_unique(&mut self, task: &Task) {
        if let Some(lock) = unique_lock(task) {
            if self.unique.get(&lock).is_some_and(|(id, _)| *id == task.id) {
                self.unique.remove(&lock);
            }
        }
    }

    fn live_task(&mut self, id: &str, now: DateTime<Utc>) -> Option<&Task> {
        if self.expires.get(id).is_some_and(|at| *at <= now) {
            self.expires.remove(id);
            self.tasks.remove(id);
            self.results.remove(id);
        }
        self.tasks.get(id)
    }
}

/// Broker that keeps every queue in process memory.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending tasks in `queue`.
    pub async fn pending_len(&self, queue: Queue) -> usize {
        self.state
            .lock()
            .await
            .pending
            .get(&queue)
            .map_or(0, BTreeMap::len)
    }

    /// Archived task ids in `queue`, newest first.
    pub async fn archived(&self, queue: Queue) -> Vec<String> {
        self.state
            .lock()
            .await
            .archived
            .get(&queue)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn after(now: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl JobBroker for InMemoryBroker {
    async fn enqueue(&self, mut task: Task) -> Result<TaskInfo> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        if let Some(lock) = unique_lock(&task) {
            let held = state
                .unique
                .get(&lock)
                .is_some_and(|(_, expires)| *expires > now);
            if held {
                return Err(JobError::Duplicate(lock));
            }
            state
                .unique
                .insert(lock, (task.id.clone(), after(now, UNIQUE_TTL)));
        }

        if task.process_at > now {
            task.state = TaskState::Scheduled;
            let info = task.info();
            state.push_delayed(task);
            Ok(info)
        } else {
            task.state = TaskState::Pending;
            let info = task.info();
            state.push_pending(task);
            Ok(info)
        }
    }

    async fn dequeue(&self, queue: Queue) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(id) = state
            .pending
            .get_mut(&queue)
            .and_then(|q| q.pop_first())
            .map(|(_, id)| id)
        else {
            return Ok(None);
        };
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(None);
        };
        task.state = TaskState::Active;
        let task = task.clone();
        state.active.insert(id, task.lease_deadline(now));
        Ok(Some(task))
    }

    async fn forward_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let due: Vec<(DateTime<Utc>, u64)> = state
            .delayed
            .range(..=(now, u64::MAX))
            .map(|(key, _)| *key)
            .collect();
        let mut forwarded = 0;
        for key in due {
            let Some(id) = state.delayed.remove(&key) else {
                continue;
            };
            if let Some(task) = state.tasks.remove(&id) {
                state.push_pending(task);
                forwarded += 1;
            }
        }
        Ok(forwarded)
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        let mut recovered = 0;
        for id in expired {
            state.active.remove(&id);
            let Some(task) = state.tasks.get(&id).map(reclaimed) else {
                continue;
            };
            if task.state == TaskState::Pending {
                state.push_pending(task);
            } else {
                state.push_archived(task, now);
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn complete(&self, task: &Task, result: &str) -> Result<()> {
        let now = Utc::now();
        let expires = after(now, task.options.retention);
        let mut state = self.state.lock().await;
        let mut done = task.clone();
        done.state = TaskState::Completed;
        state.active.remove(&done.id);
        state.release_unique(&done);
        state.tasks.insert(done.id.clone(), done);
        state.expires.insert(task.id.clone(), expires);
        state
            .results
            .insert(task.id.clone(), (result.to_string(), expires));
        Ok(())
    }

    async fn retry(&self, task: &Task, error: &str, process_at: DateTime<Utc>) -> Result<()> {
        let mut retry = task.clone();
        retry.state = TaskState::Retry;
        retry.retried += 1;
        retry.last_error = Some(error.to_string());
        retry.process_at = process_at;
        let mut state = self.state.lock().await;
        state.active.remove(&retry.id);
        state.push_delayed(retry);
        Ok(())
    }

    async fn archive(&self, task: &Task, error: &str) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut dead = task.clone();
        dead.state = TaskState::Archived;
        dead.last_error = Some(error.to_string());
        state.active.remove(&dead.id);
        state.push_archived(dead, now);
        Ok(())
    }

    async fn cancel(&self, task_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get(task_id).cloned() else {
            return Ok(false);
        };
        let removed = match task.state {
            TaskState::Pending => state.pending.get_mut(&task.queue()).is_some_and(|q| {
                let before = q.len();
                q.retain(|_, id| id != task_id);
                q.len() < before
            }),
            TaskState::Scheduled | TaskState::Retry => {
                let before = state.delayed.len();
                state.delayed.retain(|_, id| id != task_id);
                state.delayed.len() < before
            }
            _ => false,
        };
        if removed {
            state.release_unique(&task);
            state.tasks.remove(task_id);
        }
        Ok(removed)
    }

    async fn task_info(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        let now = Utc::now();
        Ok(self
            .state
            .lock()
            .await
            .live_task(task_id, now)
            .map(Task::info))
    }

    async fn result(&self, task_id: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        if state.live_task(task_id, now).is_none() {
            return Ok(None);
        }
        Ok(state.results.get(task_id).map(|(r, _)| r.clone()))
    }

    async fn stats(&self) -> Result<BrokerStats> {
        let state = self.state.lock().await;
        let queues = Queue::ALL
            .into_iter()
            .map(|queue| QueueDepth {
                queue,
                pending: state.pending.get(&queue).map_or(0, |q| q.len() as u64),
                archived: state.archived.get(&queue).map_or(0, |q| q.len() as u64),
            })
            .collect();
        let (mut scheduled, mut retry) = (0, 0);
        for id in state.delayed.values() {
            match state.tasks.get(id).map(|t| t.state) {
                Some(TaskState::Retry) => retry += 1,
                Some(_) => scheduled += 1,
                None => {}
            }
        }
        Ok(BrokerStats {
            queues,
            scheduled,
            retry,
            active: state.active.len() as u64,
        })
    }
}
