// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job service configuration.

use std::time::Duration;

use trenova_core::ConfigError;
use trenova_core::config::{env_bool, env_parse_opt, env_positive, env_var};

/// Settings for the job service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsConfig {
    /// Redis URL for the broker.
    pub redis_url: String,
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// Register the canonical recurring entries.
    pub scheduler_enabled: bool,
    /// Idle sleep between queue polls.
    pub poll_interval: Duration,
    /// Wait between a worker server crash and its restart.
    pub restart_cooldown: Duration,
    /// How long shutdown waits for in-flight tasks.
    pub shutdown_timeout: Duration,
    /// Minimum frequency for scheduled pattern analysis. `None` keeps each
    /// organization's stored thresholds.
    pub pattern_min_frequency: Option<i64>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            concurrency: 10,
            scheduler_enabled: true,
            poll_interval: Duration::from_millis(500),
            restart_cooldown: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            pattern_min_frequency: None,
        }
    }
}

impl JobsConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TRENOVA_REDIS_URL`: broker URL (default: redis://127.0.0.1:6379)
    /// - `TRENOVA_JOBS_CONCURRENCY`: worker count (default: 10)
    /// - `TRENOVA_JOBS_SCHEDULER_ENABLED`: register cron entries (default: true)
    /// - `TRENOVA_PATTERN_MIN_FREQUENCY`: scheduled analysis threshold (default: unset)
    ///
    /// Malformed values are [`ConfigError::Invalid`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let pattern_min_frequency = env_parse_opt::<i64>(
            "TRENOVA_PATTERN_MIN_FREQUENCY",
            "must be a positive integer",
        )?;
        if pattern_min_frequency.is_some_and(|n| n < 1) {
            return Err(ConfigError::Invalid(
                "TRENOVA_PATTERN_MIN_FREQUENCY",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            redis_url: env_var("TRENOVA_REDIS_URL").unwrap_or(defaults.redis_url),
            concurrency: env_positive("TRENOVA_JOBS_CONCURRENCY", defaults.concurrency)?,
            scheduler_enabled: env_bool(
                "TRENOVA_JOBS_SCHEDULER_ENABLED",
                defaults.scheduler_enabled,
            )?,
            pattern_min_frequency,
            ..defaults
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 4] = [
        "TRENOVA_REDIS_URL",
        "TRENOVA_JOBS_CONCURRENCY",
        "TRENOVA_JOBS_SCHEDULER_ENABLED",
        "TRENOVA_PATTERN_MIN_FREQUENCY",
    ];

    fn clear() {
        for key in KEYS {
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent env access.
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        let config = JobsConfig::from_env().unwrap();
        assert_eq!(config, JobsConfig::default());
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.restart_cooldown, Duration::from_secs(5));
        assert!(config.pattern_min_frequency.is_none());
    }

    #[test]
    fn test_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent env access.
        unsafe {
            env::set_var("TRENOVA_REDIS_URL", "redis://cache:6380/2");
            env::set_var("TRENOVA_JOBS_CONCURRENCY", "4");
            env::set_var("TRENOVA_JOBS_SCHEDULER_ENABLED", "false");
            env::set_var("TRENOVA_PATTERN_MIN_FREQUENCY", "5");
        }
        let config = JobsConfig::from_env().unwrap();
        clear();

        assert_eq!(config.redis_url, "redis://cache:6380/2");
        assert_eq!(config.concurrency, 4);
        assert!(!config.scheduler_enabled);
        assert_eq!(config.pattern_min_frequency, Some(5));
    }

    #[test]
    fn test_malformed_values_are_invalid() {
        let _lock = ENV_MUTEX.lock().unwrap();
        for (key, value) in [
            ("TRENOVA_JOBS_CONCURRENCY", "0"),
            ("TRENOVA_JOBS_CONCURRENCY", "ten"),
            ("TRENOVA_JOBS_SCHEDULER_ENABLED", "nope"),
            ("TRENOVA_PATTERN_MIN_FREQUENCY", "often"),
            ("TRENOVA_PATTERN_MIN_FREQUENCY", "0"),
        ] {
            clear();
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent env access.
            unsafe { env::set_var(key, value) };
            let err = JobsConfig::from_env().unwrap_err();
            clear();
            assert!(matches!(err, ConfigError::Invalid(k, _) if k == key), "{key}={value}");
        }
    }
}
