// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker server: fetch, run and settle tasks.
//!
//! The server runs `concurrency` workers plus one forwarder that promotes due
//! scheduled and retry tasks and reclaims tasks whose worker lease expired. Each fetch visits the queues in a weighted
//! random order, so a queue with weight 5 is tried first five times as often
//! as a queue with weight 1.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::JobBroker;
use crate::error::{JobError, Result};
use crate::handler::HandlerRegistry;
use crate::payload::summarize;
use crate::task::Task;
use crate::types::{Queue, retry_delay};

/// Handler time limit when a task sets none.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Receives tasks that failed permanently.
pub trait ErrorHandler: Send + Sync {
    /// Called once per archived task.
    fn handle_error(&self, task: &Task, error: &JobError);
}

/// Logs terminal failures with a payload summary.
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle_error(&self, task: &Task, error: &JobError) {
        error!(
            job_type = %task.job_type,
            job_id = %task.job_id(),
            task_id = %task.id,
            queue = %task.queue(),
            retried = task.retried,
            error_code = error.error_code(),
            error = %error,
            payload = %summarize(task.job_type, &task.payload),
            "Job processing failed permanently"
        );
    }
}

/// Worker server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of workers.
    pub concurrency: usize,
    /// Sleep when every queue is empty.
    pub poll_interval: Duration,
    /// How often due tasks are promoted and expired leases reclaimed.
    pub forward_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_millis(500),
            forward_interval: Duration::from_secs(1),
        }
    }
}

/// Lifetime counters shared by all workers.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    archived: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of [`WorkerCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    /// Tasks completed.
    pub processed: u64,
    /// Failed attempts.
    pub failed: u64,
    /// Retries scheduled.
    pub retried: u64,
    /// Tasks archived.
    pub archived: u64,
    /// Handler panics recovered.
    pub panicked: u64,
}

impl WorkerCounters {
    /// Current values.
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            archived: self.archived.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Queue visiting order for one fetch, drawn by weight without replacement.
pub fn weighted_order(rng: &mut impl Rng) -> Vec<Queue> {
    let mut remaining: Vec<Queue> = Queue::ALL.to_vec();
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let total: u32 = remaining.iter().map(Queue::weight).sum();
        let mut pick = rng.gen_range(0..total);
        let index = remaining
            .iter()
            .position(|q| {
                if pick < q.weight() {
                    true
                } else {
                    pick -= q.weight();
                    false
                }
            })
            .unwrap_or(0);
        order.push(remaining.remove(index));
    }
    order
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Fetches tasks from a broker and dispatches them to handlers.
pub struct WorkerServer {
    broker: Arc<dyn JobBroker>,
    handlers: HandlerRegistry,
    error_handler: Arc<dyn ErrorHandler>,
    counters: Arc<WorkerCounters>,
    config: ServerConfig,
}

impl WorkerServer {
    /// Create a server over `broker` dispatching through `handlers`.
    pub fn new(broker: Arc<dyn JobBroker>, handlers: HandlerRegistry, config: ServerConfig) -> Self {
        Self {
            broker,
            handlers,
            error_handler: Arc::new(LoggingErrorHandler),
            counters: Arc::new(WorkerCounters::default()),
            config,
        }
    }

    /// Replace the terminal failure handler.
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Share counters with an outer owner.
    pub fn with_counters(mut self, counters: Arc<WorkerCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Counter snapshot.
    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Run workers and the forwarder until `cancel` fires.
    ///
    /// A panic outside handler code in any worker cancels the rest and is
    /// re-raised once they have stopped, so a supervisor can restart the
    /// whole server.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let local = cancel.child_token();
        let mut set = JoinSet::new();
        for worker_id in 0..self.config.concurrency.max(1) {
            set.spawn(self.clone().run_worker(worker_id, local.clone()));
        }
        set.spawn(self.clone().run_forwarder(local.clone()));

        info!(
            concurrency = self.config.concurrency.max(1),
            handlers = self.handlers.len(),
            "Job worker server started"
        );

        let mut panic = None;
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() && panic.is_none() {
                    local.cancel();
                    panic = Some(e.into_panic());
                }
            }
        }
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }

        info!("Job worker server stopped");
        Ok(())
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "Job worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let found = match self.process_next().await {
                Ok(found) => found,
                Err(e) => {
                    warn!(worker_id, error = %e, "Failed to fetch or settle job");
                    false
                }
            };
            if !found {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        debug!(worker_id, "Job worker stopped");
    }

    async fn run_forwarder(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.forward_interval) => {}
            }
            let now = Utc::now();
            match self.broker.forward_due(now).await {
                Ok(0) => {}
                Ok(count) => debug!(count, "Forwarded due jobs"),
                Err(e) => warn!(error = %e, "Failed to forward due jobs"),
            }
            match self.broker.recover_expired(now).await {
                Ok(0) => {}
                Ok(count) => warn!(count, "Reclaimed jobs from expired worker leases"),
                Err(e) => warn!(error = %e, "Failed to reclaim expired jobs"),
            }
        }
    }

    /// Fetch one task across the queues and settle it.
    ///
    /// Returns whether a task was found.
    pub async fn process_next(&self) -> Result<bool> {
        let order = weighted_order(&mut rand::thread_rng());
        for queue in order {
            if let Some(task) = self.broker.dequeue(queue).await? {
                self.process(task).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn process(&self, task: Task) -> Result<()> {
        match self.execute(&task).await {
            Ok(result) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                debug!(job_type = %task.job_type, job_id = %task.job_id(), result = %result, "Job completed");
                self.broker.complete(&task, &result).await
            }
            Err(err) => self.settle_failure(task, err).await,
        }
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let now = Utc::now();
        if task.is_past_deadline(now) {
            return Err(JobError::DeadlineExceeded(task.id.clone()));
        }
        let handler = self
            .handlers
            .get(task.job_type)
            .ok_or(JobError::NoHandler(task.job_type))?;

        let mut timeout = task.options.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT);
        if let Some(left) = task.until_deadline(now) {
            timeout = timeout.min(left);
        }

        let call = AssertUnwindSafe(handler.process_task(task)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(payload.as_ref());
                error!(
                    job_type = %task.job_type,
                    job_id = %task.job_id(),
                    panic = %message,
                    "Job handler panicked"
                );
                Err(JobError::Panic {
                    job_type: task.job_type,
                    message,
                })
            }
            Err(_) => Err(JobError::Timeout {
                job_type: task.job_type,
                secs: timeout.as_secs(),
            }),
        }
    }

    async fn settle_failure(&self, task: Task, err: JobError) -> Result<()> {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let message = err.to_string();

        if err.is_retriable() && task.can_retry() {
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
            let delay = retry_delay(task.retried) + jitter;
            let process_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30));
            warn!(
                job_type = %task.job_type,
                job_id = %task.job_id(),
                retry_attempt = task.retried + 1,
                max_retry = task.options.max_retry,
                retry_delay_ms = delay.as_millis() as u64,
                error = %err,
                "Job retry scheduled"
            );
            self.counters.retried.fetch_add(1, Ordering::Relaxed);
            return self.broker.retry(&task, &message, process_at).await;
        }

        self.counters.archived.fetch_add(1, Ordering::Relaxed);
        self.broker.archive(&task, &message).await?;
        self.error_handler.handle_error(&task, &err);
        Ok(())
    }
}
