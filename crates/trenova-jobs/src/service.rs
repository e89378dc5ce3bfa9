// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job service: enqueue API, schedule helpers and worker lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerStats, JobBroker};
use crate::config::JobsConfig;
use crate::error::{JobError, Result};
use crate::handler::{HandlerRegistry, JobHandler};
use crate::payload::{
    ComplianceCheckPayload, DelayShipmentPayload, DuplicateShipmentPayload,
    ExpireSuggestionsPayload, JobPayload, PatternAnalysisPayload, SendEmailPayload,
    ShipmentStatusUpdatePayload, summarize,
};
use crate::scheduler::{CronScheduler, ScheduledJob, canonical_schedule};
use crate::server::{
    ErrorHandler, LoggingErrorHandler, ServerConfig, WorkerCounters, WorkerServer, WorkerStats,
};
use crate::supervisor::Supervisor;
use crate::task::{Task, TaskInfo};
use crate::types::{JobOptions, JobType, Queue};

/// Panics after which the service reports unhealthy.
pub const UNHEALTHY_PANIC_COUNT: u32 = 10;

/// Service status for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceStats {
    /// Whether workers are running.
    pub is_running: bool,
    /// When the service last started.
    pub start_time: Option<DateTime<Utc>>,
    /// Seconds since start.
    pub uptime_secs: i64,
    /// Worker server panics recovered by the supervisor.
    pub panic_count: u32,
    /// When the last one happened.
    pub last_panic: Option<DateTime<Utc>>,
    /// Registered handlers.
    pub handler_count: usize,
    /// Worker counters.
    pub workers: WorkerStats,
}

struct Running {
    cancel: CancellationToken,
    server: JoinHandle<()>,
    scheduler: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

/// Background job service.
///
/// Register handlers, then [`start`](Self::start). Enqueueing works whether
/// or not workers are running.
pub struct JobService {
    broker: Arc<dyn JobBroker>,
    handlers: HandlerRegistry,
    config: JobsConfig,
    supervisor: Arc<Supervisor>,
    counters: Arc<WorkerCounters>,
    error_handler: Arc<dyn ErrorHandler>,
    extra_entries: Mutex<Vec<ScheduledJob>>,
    running: AtomicBool,
    state: Mutex<Option<Running>>,
}

impl JobService {
    /// Create a stopped service over `broker`.
    pub fn new(broker: Arc<dyn JobBroker>, config: JobsConfig) -> Self {
        let supervisor = Arc::new(Supervisor::new("job-server", config.restart_cooldown));
        Self {
            broker,
            handlers: HandlerRegistry::new(),
            config,
            supervisor,
            counters: Arc::new(WorkerCounters::default()),
            error_handler: Arc::new(LoggingErrorHandler),
            extra_entries: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            state: Mutex::new(None),
        }
    }

    /// Replace the terminal failure handler. Takes effect on next start.
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Broker in use.
    pub fn broker(&self) -> &Arc<dyn JobBroker> {
        &self.broker
    }

    /// Register a handler. Takes effect immediately, even while running.
    pub fn register_handler(&self, handler: Arc<dyn JobHandler>) {
        debug!(job_type = %handler.job_type(), "Registered job handler");
        self.handlers.register(handler);
    }

    /// Add a recurring entry besides the canonical ones. Takes effect on
    /// next start.
    pub async fn add_schedule(&self, entry: ScheduledJob) {
        self.extra_entries.lock().await.push(entry);
    }

    /// Enqueue for immediate processing.
    pub async fn enqueue<P: Serialize>(
        &self,
        job_type: JobType,
        payload: &P,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        self.submit(job_type, payload, options, None).await
    }

    /// Enqueue to run after `delay`.
    pub async fn enqueue_in<P: Serialize>(
        &self,
        job_type: JobType,
        payload: &P,
        delay: Duration,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let at = Utc::now().checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.submit(job_type, payload, options, Some(at)).await
    }

    /// Enqueue to run at `at`.
    pub async fn enqueue_at<P: Serialize>(
        &self,
        job_type: JobType,
        payload: &P,
        at: DateTime<Utc>,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        self.submit(job_type, payload, options, Some(at)).await
    }

    async fn submit<P: Serialize>(
        &self,
        job_type: JobType,
        payload: &P,
        options: Option<JobOptions>,
        process_at: Option<DateTime<Utc>>,
    ) -> Result<TaskInfo> {
        let options = options.unwrap_or_else(|| JobOptions::on(job_type.default_queue()));
        let task = Task::new(job_type, payload, options, process_at)?;
        debug!(
            job_type = %job_type,
            queue = %task.options.queue,
            priority = task.options.priority.value(),
            payload = %summarize(job_type, &task.payload),
            "Scheduling job"
        );
        let info = self.broker.enqueue(task).await?;
        info!(
            task_id = %info.id,
            job_id = %info.job_id,
            job_type = %info.job_type,
            queue = %info.queue,
            "Job enqueued successfully"
        );
        Ok(info)
    }

    async fn schedule<P: JobPayload>(
        &self,
        job_type: JobType,
        mut payload: P,
        options: JobOptions,
    ) -> Result<TaskInfo> {
        payload.base_mut().restamp();
        self.submit(job_type, &payload, Some(options), None).await
    }

    /// Queue a pattern analysis run.
    ///
    /// Without an explicit unique key, runs are deduplicated per
    /// organization (`pattern_analysis_{org}`) for an hour.
    pub async fn schedule_pattern_analysis(
        &self,
        payload: PatternAnalysisPayload,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        let mut options = options.unwrap_or_else(JobOptions::pattern_analysis);
        if options.unique_key.is_none() {
            let org = payload.base.organization_id.as_deref().unwrap_or("system");
            options.unique_key = Some(format!("pattern_analysis_{org}"));
        }
        self.schedule(JobType::AnalyzePatterns, payload, options)
            .await
    }

    /// Queue a delay sweep.
    pub async fn schedule_delay_shipment_jobs(
        &self,
        payload: DelayShipmentPayload,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        let options = options.unwrap_or_else(JobOptions::delay_shipment);
        self.schedule(JobType::DelayShipment, payload, options).await
    }

    /// Queue a suggestion expiry sweep on the system queue.
    pub async fn schedule_expire_suggestions(
        &self,
        payload: ExpireSuggestionsPayload,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        let options = options.unwrap_or_else(|| JobOptions::on(Queue::System));
        self.schedule(JobType::ExpireOldSuggestions, payload, options)
            .await
    }

    /// Queue an email on the email queue.
    pub async fn schedule_send_email(
        &self,
        payload: SendEmailPayload,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        let options = options.unwrap_or_else(JobOptions::email);
        self.schedule(JobType::SendEmail, payload, options).await
    }

    /// Queue a status change notification on the critical queue.
    pub async fn schedule_shipment_status_update(
        &self,
        payload: ShipmentStatusUpdatePayload,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        let options = options.unwrap_or_else(JobOptions::critical);
        self.schedule(JobType::ShipmentStatusUpdate, payload, options)
            .await
    }

    /// Queue a compliance check.
    pub async fn schedule_compliance_check(
        &self,
        payload: ComplianceCheckPayload,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        let options = options.unwrap_or_else(|| JobOptions::on(Queue::Compliance));
        self.schedule(JobType::ComplianceCheck, payload, options)
            .await
    }

    /// Queue a bulk shipment duplication.
    pub async fn schedule_duplicate_shipment(
        &self,
        payload: DuplicateShipmentPayload,
        options: Option<JobOptions>,
    ) -> Result<TaskInfo> {
        let options = options.unwrap_or_else(|| JobOptions::on(Queue::Shipment));
        self.schedule(JobType::DuplicateShipment, payload, options)
            .await
    }

    /// Remove a task that has not started.
    pub async fn cancel_job(&self, task_id: &str) -> Result<bool> {
        let removed = self.broker.cancel(task_id).await?;
        if removed {
            info!(task_id, "Cancelled job");
        }
        Ok(removed)
    }

    /// State of a task.
    pub async fn job_info(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        self.broker.task_info(task_id).await
    }

    /// Result written by a completed task.
    pub async fn job_result(&self, task_id: &str) -> Result<Option<String>> {
        self.broker.result(task_id).await
    }

    /// Queue depths.
    pub async fn queue_stats(&self) -> Result<BrokerStats> {
        self.broker.stats().await
    }

    /// Start workers under the supervisor and, when enabled, the scheduler.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(JobError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let server = Arc::new(
            WorkerServer::new(
                self.broker.clone(),
                self.handlers.clone(),
                ServerConfig {
                    concurrency: self.config.concurrency,
                    poll_interval: self.config.poll_interval,
                    ..ServerConfig::default()
                },
            )
            .with_counters(self.counters.clone())
            .with_error_handler(self.error_handler.clone()),
        );

        let server_handle = {
            let supervisor = self.supervisor.clone();
            let token = cancel.clone();
            let run_token = cancel.clone();
            tokio::spawn(async move {
                supervisor
                    .supervise(token, move || server.clone().run(run_token.clone()))
                    .await
            })
        };

        let mut entries = Vec::new();
        if self.config.scheduler_enabled {
            entries = canonical_schedule(self.config.pattern_min_frequency)?;
        }
        entries.extend(self.extra_entries.lock().await.iter().cloned());
        let scheduler_handle = if entries.is_empty() {
            None
        } else {
            let scheduler = CronScheduler::new(self.broker.clone());
            for entry in entries {
                scheduler.add(entry).await;
            }
            Some(tokio::spawn(Arc::new(scheduler).run(cancel.clone())))
        };

        let started_at = Utc::now();
        *state = Some(Running {
            cancel,
            server: server_handle,
            scheduler: scheduler_handle,
            started_at,
        });
        self.running.store(true, Ordering::SeqCst);

        info!(
            concurrency = self.config.concurrency,
            handlers = self.handlers.len(),
            job_types = ?self.handlers.job_types(),
            scheduler = self.config.scheduler_enabled,
            "Job service started"
        );
        Ok(())
    }

    /// Stop workers and the scheduler, then close the broker.
    ///
    /// In-flight tasks get `shutdown_timeout` to finish before their tasks
    /// are aborted.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(running) = self.state.lock().await.take() else {
            return Ok(());
        };
        info!("Job service shutting down");
        running.cancel.cancel();

        let timeout = self.config.shutdown_timeout;
        let mut handles = vec![("worker server", running.server)];
        if let Some(scheduler) = running.scheduler {
            handles.push(("scheduler", scheduler));
        }
        for (name, mut handle) in handles {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(component = name, error = %e, "Job service task failed"),
                Err(_) => {
                    warn!(
                        component = name,
                        timeout_secs = timeout.as_secs(),
                        "Job service task did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.broker.close().await?;
        info!("Job service stopped");
        Ok(())
    }

    /// Whether workers are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Running with fewer than [`UNHEALTHY_PANIC_COUNT`] recovered panics.
    pub fn is_healthy(&self) -> bool {
        self.is_running() && self.supervisor.panic_count() < UNHEALTHY_PANIC_COUNT
    }

    /// Current status.
    pub async fn stats(&self) -> JobServiceStats {
        let start_time = self.state.lock().await.as_ref().map(|r| r.started_at);
        let supervisor = self.supervisor.state();
        JobServiceStats {
            is_running: self.is_running(),
            start_time,
            uptime_secs: start_time.map_or(0, |t| (Utc::now() - t).num_seconds()),
            panic_count: supervisor.panic_count,
            last_panic: supervisor.last_panic,
            handler_count: self.handlers.len(),
            workers: self.counters.snapshot(),
        }
    }
}
