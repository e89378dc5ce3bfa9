// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job types, queues, priorities and per-job options.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Every task name the engine knows, written `{domain}:{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobType {
    /// Detect recurring lanes and create suggestions.
    AnalyzePatterns,
    /// Move overdue pending suggestions to Expired.
    ExpireOldSuggestions,
    /// Propagate a shipment status change.
    ShipmentStatusUpdate,
    /// Create copies of a shipment.
    DuplicateShipment,
    /// Notify about a shipment event.
    ShipmentNotification,
    /// Mark overdue in-flight shipments as Delayed.
    DelayShipment,
    /// Send one email.
    SendEmail,
    /// Drain the outbound email queue.
    ProcessEmailQueue,
    /// Run compliance checks.
    ComplianceCheck,
    /// Check hazmat certification expirations.
    HazmatExpirationCheck,
    /// Remove stale temporary files.
    CleanupTempFiles,
    /// Produce scheduled reports.
    GenerateReports,
    /// Back up tenant data.
    DataBackup,
}

impl JobType {
    /// All job types.
    pub const ALL: [JobType; 13] = [
        Self::AnalyzePatterns,
        Self::ExpireOldSuggestions,
        Self::ShipmentStatusUpdate,
        Self::DuplicateShipment,
        Self::ShipmentNotification,
        Self::DelayShipment,
        Self::SendEmail,
        Self::ProcessEmailQueue,
        Self::ComplianceCheck,
        Self::HazmatExpirationCheck,
        Self::CleanupTempFiles,
        Self::GenerateReports,
        Self::DataBackup,
    ];

    /// Task name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyzePatterns => "pattern:analyze",
            Self::ExpireOldSuggestions => "pattern:expire_suggestions",
            Self::ShipmentStatusUpdate => "shipment:status_update",
            Self::DuplicateShipment => "shipment:duplicate",
            Self::ShipmentNotification => "shipment:notification",
            Self::DelayShipment => "shipment:delay",
            Self::SendEmail => "email:send",
            Self::ProcessEmailQueue => "email:process_queue",
            Self::ComplianceCheck => "compliance:check",
            Self::HazmatExpirationCheck => "compliance:hazmat_expiration",
            Self::CleanupTempFiles => "system:cleanup_temp_files",
            Self::GenerateReports => "system:generate_reports",
            Self::DataBackup => "system:data_backup",
        }
    }

    /// Queue used when the caller gives no options.
    pub fn default_queue(&self) -> Queue {
        match self {
            Self::AnalyzePatterns => Queue::PatternAnalysis,
            Self::ShipmentStatusUpdate => Queue::Critical,
            Self::DuplicateShipment | Self::ShipmentNotification | Self::DelayShipment => {
                Queue::Shipment
            }
            Self::SendEmail | Self::ProcessEmailQueue => Queue::Email,
            Self::ComplianceCheck | Self::HazmatExpirationCheck => Queue::Compliance,
            Self::ExpireOldSuggestions
            | Self::CleanupTempFiles
            | Self::GenerateReports
            | Self::DataBackup => Queue::System,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobError::UnknownJobType(s.to_string()))
    }
}

impl TryFrom<String> for JobType {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        value.as_str().to_string()
    }
}

/// Named worker queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    /// Latency sensitive work.
    Critical,
    /// Outbound email.
    Email,
    /// Shipment maintenance.
    Shipment,
    /// Lane pattern detection.
    PatternAnalysis,
    /// Compliance checks.
    Compliance,
    /// Housekeeping.
    System,
    /// Everything else.
    Default,
}

impl Queue {
    /// All queues, highest weight first.
    pub const ALL: [Queue; 7] = [
        Self::Critical,
        Self::Email,
        Self::Shipment,
        Self::PatternAnalysis,
        Self::Compliance,
        Self::System,
        Self::Default,
    ];

    /// Queue name in Redis keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Email => "email",
            Self::Shipment => "shipment",
            Self::PatternAnalysis => "pattern_analysis",
            Self::Compliance => "compliance",
            Self::System => "system",
            Self::Default => "default",
        }
    }

    /// Relative share of worker fetches.
    pub fn weight(&self) -> u32 {
        match self {
            Self::Critical => 5,
            Self::Email => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority within a queue. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Priority {
    /// Background work.
    Low = 1,
    /// Default.
    Normal = 5,
    /// Ahead of normal work.
    High = 10,
    /// Ahead of everything.
    Critical = 20,
}

impl Priority {
    /// Numeric level.
    pub fn value(&self) -> i32 {
        *self as i32
    }
}

impl From<Priority> for i32 {
    fn from(value: Priority) -> Self {
        value.value()
    }
}

impl TryFrom<i32> for Priority {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Low),
            5 => Ok(Self::Normal),
            10 => Ok(Self::High),
            20 => Ok(Self::Critical),
            other => Err(format!("unknown priority {other}")),
        }
    }
}

/// Completed task results are kept this long unless a job says otherwise.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a unique key blocks duplicates.
pub const UNIQUE_TTL: Duration = Duration::from_secs(60 * 60);

/// Per-task options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Target queue.
    pub queue: Queue,
    /// Priority within the queue.
    pub priority: Priority,
    /// Retries after the first attempt.
    pub max_retry: u32,
    /// Unix seconds after which the task is no longer run.
    #[serde(default)]
    pub deadline: Option<i64>,
    /// Reject duplicates with the same key for one hour.
    #[serde(default)]
    pub unique_key: Option<String>,
    /// Handler time limit.
    #[serde(default, with = "opt_secs")]
    pub timeout: Option<Duration>,
    /// How long results are kept after completion.
    #[serde(with = "secs")]
    pub retention: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            queue: Queue::Default,
            priority: Priority::Normal,
            max_retry: 3,
            deadline: None,
            unique_key: None,
            timeout: None,
            retention: DEFAULT_RETENTION,
        }
    }
}

impl JobOptions {
    /// Options on a specific queue with the defaults otherwise.
    pub fn on(queue: Queue) -> Self {
        Self {
            queue,
            ..Self::default()
        }
    }

    /// Critical queue, critical priority.
    pub fn critical() -> Self {
        Self {
            queue: Queue::Critical,
            priority: Priority::Critical,
            max_retry: 5,
            ..Self::default()
        }
    }

    /// Pattern analysis: low priority, long running.
    pub fn pattern_analysis() -> Self {
        Self {
            queue: Queue::PatternAnalysis,
            priority: Priority::Low,
            max_retry: 3,
            timeout: Some(Duration::from_secs(30 * 60)),
            ..Self::default()
        }
    }

    /// Delay sweep: must finish before the next tick.
    pub fn delay_shipment() -> Self {
        Self {
            queue: Queue::Shipment,
            priority: Priority::High,
            max_retry: 3,
            timeout: Some(Duration::from_secs(60)),
            ..Self::default()
        }
    }

    /// Email delivery.
    pub fn email() -> Self {
        Self {
            queue: Queue::Email,
            priority: Priority::Normal,
            max_retry: 3,
            ..Self::default()
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Set the unique key.
    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    /// Set the handler time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the result retention.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the deadline (unix seconds).
    pub fn with_deadline(mut self, deadline: i64) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Back-off before retry number `retried + 1`: `2ⁿ` seconds capped at 30.
pub fn retry_delay(retried: u32) -> Duration {
    Duration::from_secs(1u64.checked_shl(retried).unwrap_or(u64::MAX).min(30))
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_secs))
    }
}
