// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! CDC consumer configuration.

use std::time::Duration;

use trenova_core::ConfigError;
use trenova_core::config::{env_bool, env_parse, env_positive, env_var};

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Oldest retained message.
    Earliest,
    /// Only messages produced after subscription.
    Latest,
}

impl StartOffset {
    /// Parse `earliest`/`latest` case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "earliest" => Some(Self::Earliest),
            "latest" => Some(Self::Latest),
            _ => None,
        }
    }

    /// Broker configuration value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// Handler retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Back-off before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any back-off.
    pub max_backoff: Duration,
    /// Multiplier applied after every failed attempt.
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Back-off after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.factor.max(1.0).powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Configuration for the CDC consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct CdcConfig {
    /// Whether the consumer starts at all.
    pub enabled: bool,
    /// Broker bootstrap list.
    pub brokers: Vec<String>,
    /// Consumer group shared by every topic.
    pub consumer_group: String,
    /// Topic glob (e.g. `trenova.public.*`).
    pub topic_pattern: String,
    /// Starting offset for a new group.
    pub start_offset: StartOffset,
    /// Confluent schema registry base URL.
    pub schema_registry_url: String,
    /// Maximum cached schemas.
    pub schema_cache_size: usize,
    /// Whether messages are handed to a worker pool.
    pub parallel: bool,
    /// Worker pool size.
    pub worker_count: usize,
    /// Bounded channel between ingest and workers.
    pub channel_buffer: usize,
    /// How long `stop` waits for workers to drain.
    pub shutdown_timeout: Duration,
    /// Deadline for a single handler invocation.
    pub handler_timeout: Duration,
    /// Handler retry policy.
    pub retry: RetryPolicy,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            brokers: vec!["localhost:9092".to_string()],
            consumer_group: "trenova-cdc".to_string(),
            topic_pattern: "trenova.public.*".to_string(),
            start_offset: StartOffset::Latest,
            schema_registry_url: "http://localhost:8081".to_string(),
            schema_cache_size: 100,
            parallel: true,
            worker_count: 4,
            channel_buffer: 100,
            shutdown_timeout: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl CdcConfig {
    /// Load configuration from environment variables.
    ///
    /// Every `TRENOVA_CDC_*` variable is optional. A value that does not
    /// parse is [`ConfigError::Invalid`]; a set `TRENOVA_CDC_BROKERS` with
    /// no broker names is [`ConfigError::Missing`] while CDC is enabled.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let enabled = env_bool("TRENOVA_CDC_ENABLED", defaults.enabled)?;

        let brokers = match env_var("TRENOVA_CDC_BROKERS") {
            Some(v) => {
                let brokers: Vec<String> = v
                    .split(',')
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(String::from)
                    .collect();
                if brokers.is_empty() {
                    if enabled {
                        return Err(ConfigError::Missing("TRENOVA_CDC_BROKERS"));
                    }
                    defaults.brokers
                } else {
                    brokers
                }
            }
            None => defaults.brokers,
        };

        let start_offset = match env_var("TRENOVA_CDC_START_OFFSET") {
            Some(v) => StartOffset::parse(&v).ok_or(ConfigError::Invalid(
                "TRENOVA_CDC_START_OFFSET",
                "must be earliest or latest",
            ))?,
            None => defaults.start_offset,
        };

        let factor = env_parse(
            "TRENOVA_CDC_RETRY_FACTOR",
            defaults.retry.factor,
            "must be a number",
        )?;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::Invalid(
                "TRENOVA_CDC_RETRY_FACTOR",
                "must be at least 1.0",
            ));
        }

        let retry = RetryPolicy {
            max_attempts: env_positive("TRENOVA_CDC_MAX_RETRIES", defaults.retry.max_attempts)?,
            initial_backoff: Duration::from_millis(env_parse(
                "TRENOVA_CDC_RETRY_BACKOFF_MS",
                defaults.retry.initial_backoff.as_millis() as u64,
                "must be a number of milliseconds",
            )?),
            max_backoff: Duration::from_millis(env_parse(
                "TRENOVA_CDC_RETRY_MAX_BACKOFF_MS",
                defaults.retry.max_backoff.as_millis() as u64,
                "must be a number of milliseconds",
            )?),
            factor,
        };

        Ok(Self {
            enabled,
            brokers,
            consumer_group: env_var("TRENOVA_CDC_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            topic_pattern: env_var("TRENOVA_CDC_TOPIC_PATTERN").unwrap_or(defaults.topic_pattern),
            start_offset,
            schema_registry_url: env_var("TRENOVA_CDC_SCHEMA_REGISTRY_URL")
                .unwrap_or(defaults.schema_registry_url),
            schema_cache_size: env_positive(
                "TRENOVA_CDC_SCHEMA_CACHE_SIZE",
                defaults.schema_cache_size,
            )?,
            parallel: env_bool("TRENOVA_CDC_PARALLEL", defaults.parallel)?,
            worker_count: env_positive("TRENOVA_CDC_WORKER_COUNT", defaults.worker_count)?,
            channel_buffer: env_positive("TRENOVA_CDC_CHANNEL_BUFFER", defaults.channel_buffer)?,
            shutdown_timeout: Duration::from_secs(env_parse(
                "TRENOVA_CDC_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
                "must be a number of seconds",
            )?),
            handler_timeout: defaults.handler_timeout,
            retry,
        })
    }
}
