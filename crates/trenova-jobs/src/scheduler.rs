// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recurring job scheduler.
//!
//! Entries use either a five-field cron expression (`0 */6 * * *`, UTC) or
//! the `@every <duration>` shortcut (`@every 1m`, `@every 1h30m`). Every time
//! an entry fires its payload is built again, so each run gets a new job id
//! and timestamp.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::JobBroker;
use crate::error::{JobError, Result};
use crate::payload::{
    DelayShipmentPayload, ExpireSuggestionsPayload, JobBasePayload, PatternAnalysisPayload,
    ProcessEmailQueuePayload,
};
use crate::task::Task;
use crate::types::{JobOptions, JobType, Queue};

/// When an entry fires.
#[derive(Clone)]
pub enum Schedule {
    /// Fixed interval from the previous run.
    Every(chrono::Duration),
    /// Cron expression evaluated in UTC.
    Cron(Box<Cron>),
}

impl Schedule {
    /// Parse `@every <duration>` or a cron expression.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if let Some(interval) = spec.strip_prefix("@every") {
            return parse_interval(interval.trim())
                .map(Self::Every)
                .ok_or_else(|| JobError::InvalidSchedule {
                    spec: spec.to_string(),
                    message: "expected a duration such as 30s, 5m or 24h".into(),
                });
        }
        Cron::new(spec)
            .parse()
            .map(|cron| Self::Cron(Box::new(cron)))
            .map_err(|e| JobError::InvalidSchedule {
                spec: spec.to_string(),
                message: e.to_string(),
            })
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Every(interval) => after.checked_add_signed(*interval),
            Self::Cron(cron) => cron.find_next_occurrence(&after, false).ok(),
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(interval) => write!(f, "Every({}s)", interval.num_seconds()),
            Self::Cron(_) => f.write_str("Cron"),
        }
    }
}

/// Parse `1h30m`, `45s`, `2d`. Zero is rejected.
fn parse_interval(input: &str) -> Option<chrono::Duration> {
    if input.is_empty() {
        return None;
    }
    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: i64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(unit)?)?;
    }
    if !digits.is_empty() || total == 0 {
        return None;
    }
    Some(chrono::Duration::seconds(total))
}

/// Builds a fresh payload each time an entry fires.
pub type PayloadFactory = Arc<dyn Fn() -> Result<Value> + Send + Sync>;

/// One recurring entry.
#[derive(Clone)]
pub struct ScheduledJob {
    /// Entry name for logs.
    pub name: String,
    /// Expression as configured.
    pub spec: String,
    schedule: Schedule,
    /// Job type to enqueue.
    pub job_type: JobType,
    /// Options for every enqueued task.
    pub options: JobOptions,
    payload: PayloadFactory,
    next_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    /// Parse `spec` and schedule the first run after now.
    pub fn new(
        name: impl Into<String>,
        spec: &str,
        job_type: JobType,
        options: JobOptions,
        payload: PayloadFactory,
    ) -> Result<Self> {
        let schedule = Schedule::parse(spec)?;
        let next_run = schedule.next_after(Utc::now());
        Ok(Self {
            name: name.into(),
            spec: spec.to_string(),
            schedule,
            job_type,
            options,
            payload,
            next_run,
        })
    }

    /// Next fire time.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run
    }

    fn should_run(&self, now: DateTime<Utc>) -> bool {
        self.next_run.is_some_and(|next| now >= next)
    }

    /// Missed runs are skipped rather than replayed.
    fn advance_schedule(&mut self, now: DateTime<Utc>) {
        self.next_run = self.schedule.next_after(now);
    }

    fn build_task(&self) -> Result<Task> {
        let payload = (self.payload)()?;
        Task::new(self.job_type, &payload, self.options.clone(), None)
    }
}

fn factory<P, F>(build: F) -> PayloadFactory
where
    P: serde::Serialize,
    F: Fn() -> P + Send + Sync + 'static,
{
    Arc::new(move || serde_json::to_value(build()).map_err(JobError::from))
}

/// The five recurring entries the backend always runs.
///
/// `pattern_min_frequency`, when set, is carried in the analysis payloads and
/// overrides per-organization thresholds.
pub fn canonical_schedule(pattern_min_frequency: Option<i64>) -> Result<Vec<ScheduledJob>> {
    let analysis = move || PatternAnalysisPayload {
        base: JobBasePayload::system(),
        min_frequency: pattern_min_frequency,
        trigger_reason: "scheduled".into(),
        ..PatternAnalysisPayload::default()
    };

    Ok(vec![
        ScheduledJob::new(
            "delay-shipments",
            "@every 1m",
            JobType::DelayShipment,
            JobOptions::on(Queue::Shipment).with_timeout(Duration::from_secs(60)),
            factory(|| DelayShipmentPayload {
                base: JobBasePayload::system(),
            }),
        )?,
        ScheduledJob::new(
            "daily-pattern-analysis",
            "@every 24h",
            JobType::AnalyzePatterns,
            JobOptions::on(Queue::PatternAnalysis).with_retention(Duration::from_secs(24 * 3600)),
            factory(analysis),
        )?,
        ScheduledJob::new(
            "weekly-pattern-analysis",
            "0 1 * * 0",
            JobType::AnalyzePatterns,
            JobOptions::on(Queue::PatternAnalysis).with_max_retry(3),
            factory(analysis),
        )?,
        ScheduledJob::new(
            "expire-suggestions",
            "0 */6 * * *",
            JobType::ExpireOldSuggestions,
            JobOptions::on(Queue::System).with_max_retry(2),
            factory(|| ExpireSuggestionsPayload {
                base: JobBasePayload::system(),
                batch_size: 100,
            }),
        )?,
        ScheduledJob::new(
            "process-email-queue",
            "@every 5m",
            JobType::ProcessEmailQueue,
            JobOptions::on(Queue::Email)
                .with_timeout(Duration::from_secs(5 * 60))
                .with_max_retry(3),
            factory(|| ProcessEmailQueuePayload {
                base: JobBasePayload::system(),
            }),
        )?,
    ])
}

/// Enqueues recurring entries when they come due.
pub struct CronScheduler {
    broker: Arc<dyn JobBroker>,
    entries: Mutex<Vec<ScheduledJob>>,
    check_interval: Duration,
}

impl CronScheduler {
    /// Create a scheduler with no entries.
    pub fn new(broker: Arc<dyn JobBroker>) -> Self {
        Self {
            broker,
            entries: Mutex::new(Vec::new()),
            check_interval: Duration::from_secs(1),
        }
    }

    /// Set how often due entries are checked.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Add an entry.
    pub async fn add(&self, entry: ScheduledJob) {
        info!(
            entry = %entry.name,
            job_type = %entry.job_type,
            schedule = %entry.spec,
            queue = %entry.options.queue,
            max_retries = entry.options.max_retry,
            timeout_secs = entry.options.timeout.map(|t| t.as_secs()),
            retention_secs = entry.options.retention.as_secs(),
            next_run = ?entry.next_run,
            "Scheduled recurring job"
        );
        self.entries.lock().await.push(entry);
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether there are no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Names and next fire times.
    pub async fn upcoming(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| (e.name.clone(), e.next_run))
            .collect()
    }

    /// Enqueue every entry due at `now` and advance it.
    ///
    /// Returns the number of tasks enqueued. Duplicates rejected by a unique
    /// key and enqueue failures are logged and skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let mut enqueued = 0;
        for entry in entries.iter_mut().filter(|e| e.should_run(now)) {
            entry.advance_schedule(now);
            let task = match entry.build_task() {
                Ok(task) => task,
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "Failed to build scheduled payload");
                    continue;
                }
            };
            match self.broker.enqueue(task).await {
                Ok(info) => {
                    enqueued += 1;
                    debug!(
                        entry = %entry.name,
                        job_type = %info.job_type,
                        job_id = %info.job_id,
                        next_run = ?entry.next_run,
                        "Enqueued scheduled job"
                    );
                }
                Err(JobError::Duplicate(key)) => {
                    debug!(entry = %entry.name, unique_key = %key, "Scheduled job already queued");
                }
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "Failed to enqueue scheduled job");
                }
            }
        }
        enqueued
    }

    /// Check entries until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let entries = self.len().await;
        info!(entries, "Cron scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {}
            }
            self.tick(Utc::now()).await;
        }
        info!("Cron scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use chrono::TimeZone;

    #[test]
    fn test_parse_every() {
        let Schedule::Every(d) = Schedule::parse("@every 1m").unwrap() else {
            panic!("expected interval");
        };
        assert_eq!(d, chrono::Duration::minutes(1));
        let Schedule::Every(d) = Schedule::parse("@every 1h30m").unwrap() else {
            panic!("expected interval");
        };
        assert_eq!(d, chrono::Duration::minutes(90));
        for bad in ["@every", "@every 0s", "@every 5", "@every 3w", "@every m"] {
            assert!(Schedule::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_cron_next_occurrence() {
        let schedule = Schedule::parse("0 */6 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 7, 15, 0).unwrap();
        assert_eq!(
            schedule.next_after(at),
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap())
        );

        // 2025-03-04 is a Tuesday; the next Sunday is 2025-03-09.
        let weekly = Schedule::parse("0 1 * * 0").unwrap();
        assert_eq!(
            weekly.next_after(at),
            Some(Utc.with_ymd_and_hms(2025, 3, 9, 1, 0, 0).unwrap())
        );
        assert!(Schedule::parse("not a cron").is_err());
    }

    #[test]
    fn test_canonical_schedule() {
        let entries = canonical_schedule(Some(4)).unwrap();
        let summary: Vec<(&str, &str, JobType, Queue, u32)> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.spec.as_str(), e.job_type, e.options.queue, e.options.max_retry))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("delay-shipments", "@every 1m", JobType::DelayShipment, Queue::Shipment, 3),
                ("daily-pattern-analysis", "@every 24h", JobType::AnalyzePatterns, Queue::PatternAnalysis, 3),
                ("weekly-pattern-analysis", "0 1 * * 0", JobType::AnalyzePatterns, Queue::PatternAnalysis, 3),
                ("expire-suggestions", "0 */6 * * *", JobType::ExpireOldSuggestions, Queue::System, 2),
                ("process-email-queue", "@every 5m", JobType::ProcessEmailQueue, Queue::Email, 3),
            ]
        );
        assert_eq!(entries[0].options.timeout, Some(Duration::from_secs(60)));
        assert_eq!(entries[4].options.timeout, Some(Duration::from_secs(300)));
        assert_eq!(entries[1].options.retention, Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_tick_builds_fresh_payloads() {
        let broker = Arc::new(InMemoryBroker::new());
        let scheduler = CronScheduler::new(broker.clone());
        for entry in canonical_schedule(Some(4)).unwrap() {
            scheduler.add(entry).await;
        }

        let now = Utc::now();
        assert_eq!(scheduler.tick(now).await, 0);

        let in_two_minutes = now + chrono::Duration::minutes(2);
        assert!(scheduler.tick(in_two_minutes).await >= 1);
        let first = broker.dequeue(Queue::Shipment).await.unwrap().unwrap();
        assert_eq!(first.job_type, JobType::DelayShipment);

        let in_four_minutes = now + chrono::Duration::minutes(4);
        assert!(scheduler.tick(in_four_minutes).await >= 1);
        let second = broker.dequeue(Queue::Shipment).await.unwrap().unwrap();
        assert_ne!(first.job_id(), second.job_id());
        assert!(first.job_id().starts_with("job_"));

        let next_day = now + chrono::Duration::hours(25);
        assert!(scheduler.tick(next_day).await >= 3);
        let analysis = broker.dequeue(Queue::PatternAnalysis).await.unwrap().unwrap();
        assert_eq!(analysis.payload["minFrequency"], 4);
        assert_eq!(analysis.payload["triggerReason"], "scheduled");
        assert!(analysis.payload.get("organizationId").is_none());
    }
}
