// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stream service configuration.

use std::time::Duration;

use trenova_core::ConfigError;
use trenova_core::config::env_parse;

/// Limits and timings for the stream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Maximum connected clients per stream key.
    pub max_connections: usize,
    /// Maximum connected clients per user across every stream.
    pub max_connections_per_user: usize,
    /// Upper bound on a single client connection (`None` = unbounded).
    pub stream_timeout: Option<Duration>,
    /// Capacity of each client's send queue.
    pub send_queue_capacity: usize,
    /// How long a broadcast waits for room in a full client queue.
    pub send_timeout: Duration,
    /// Interval between `ping` events on an idle connection.
    pub heartbeat_interval: Duration,
    /// Clients not seen for this long are removed by the sweeper.
    pub stale_after: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_connections_per_user: 5,
            stream_timeout: None,
            send_queue_capacity: 100,
            send_timeout: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl StreamConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TRENOVA_STREAM_MAX_CONNECTIONS`: clients per stream key (default: 100)
    /// - `TRENOVA_STREAM_MAX_CONNECTIONS_PER_USER`: clients per user (default: 5)
    /// - `TRENOVA_STREAM_TIMEOUT_SECS`: per-client timeout, 0 disables (default: 0)
    ///
    /// Malformed values are [`ConfigError::Invalid`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_connections = env_parse(
            "TRENOVA_STREAM_MAX_CONNECTIONS",
            defaults.max_connections,
            "must be a non-negative integer",
        )?;
        let max_connections_per_user = env_parse(
            "TRENOVA_STREAM_MAX_CONNECTIONS_PER_USER",
            defaults.max_connections_per_user,
            "must be a non-negative integer",
        )?;
        let timeout_secs: u64 = env_parse(
            "TRENOVA_STREAM_TIMEOUT_SECS",
            0,
            "must be a number of seconds",
        )?;

        Ok(Self {
            max_connections,
            max_connections_per_user,
            stream_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            ..defaults
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    struct EnvGuard {
        keys: Vec<&'static str>,
    }

    impl EnvGuard {
        fn set(pairs: &[(&'static str, &str)]) -> Self {
            for (key, value) in pairs {
                // SAFETY: Tests touching the environment are serialized via #[serial].
                unsafe { env::set_var(key, value) };
            }
            Self {
                keys: pairs.iter().map(|(k, _)| *k).collect(),
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for key in &self.keys {
                // SAFETY: Tests touching the environment are serialized via #[serial].
                unsafe { env::remove_var(key) };
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        let config = StreamConfig::from_env().unwrap();
        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.send_queue_capacity, 100);
        assert_eq!(config.send_timeout, Duration::from_millis(100));
        assert!(config.stream_timeout.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        let _guard = EnvGuard::set(&[
            ("TRENOVA_STREAM_MAX_CONNECTIONS", "10"),
            ("TRENOVA_STREAM_MAX_CONNECTIONS_PER_USER", "2"),
            ("TRENOVA_STREAM_TIMEOUT_SECS", "300"),
        ]);
        let config = StreamConfig::from_env().unwrap();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.max_connections_per_user, 2);
        assert_eq!(config.stream_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    #[serial]
    fn test_malformed_values_are_invalid() {
        for (key, value) in [
            ("TRENOVA_STREAM_MAX_CONNECTIONS", "lots"),
            ("TRENOVA_STREAM_MAX_CONNECTIONS_PER_USER", "-1"),
            ("TRENOVA_STREAM_TIMEOUT_SECS", "5m"),
        ] {
            let _guard = EnvGuard::set(&[(key, value)]);
            let err = StreamConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(k, _) if k == key), "{key}={value}");
        }
    }

    #[test]
    #[serial]
    fn test_zero_timeout_is_unbounded() {
        let _guard = EnvGuard::set(&[("TRENOVA_STREAM_TIMEOUT_SECS", "0")]);
        assert!(StreamConfig::from_env().unwrap().stream_timeout.is_none());
    }
}
