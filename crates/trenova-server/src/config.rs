// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;

use trenova_cdc::CdcConfig;
use trenova_core::config::env_var;
use trenova_jobs::JobsConfig;
use trenova_streaming::StreamConfig;

pub use trenova_core::ConfigError;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Trenova server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// PostgreSQL URL for lanes and suggestions; in-memory stores when unset
    pub database_url: Option<String>,
    /// Log output format
    pub log_format: LogFormat,
    /// CDC consumer settings
    pub cdc: CdcConfig,
    /// Stream service settings
    pub streaming: StreamConfig,
    /// Job service settings
    pub jobs: JobsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            log_format: LogFormat::Text,
            cdc: CdcConfig::default(),
            streaming: StreamConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `TRENOVA_HTTP_PORT`: HTTP listen port (default: 8080)
    /// - `TRENOVA_DATABASE_URL`: PostgreSQL connection string (default: unset)
    /// - `TRENOVA_LOG_FORMAT`: `text` or `json` (default: text)
    ///
    /// Subsystem variables are read by [`CdcConfig::from_env`],
    /// [`StreamConfig::from_env`] and [`JobsConfig::from_env`]; the first
    /// malformed value found is returned.
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_port: u16 = trenova_core::config::env_parse(
            "TRENOVA_HTTP_PORT",
            8080,
            "must be a valid port number",
        )?;

        let log_format = match env_var("TRENOVA_LOG_FORMAT") {
            Some(v) => LogFormat::parse(&v)
                .ok_or(ConfigError::Invalid("TRENOVA_LOG_FORMAT", "must be text or json"))?,
            None => LogFormat::Text,
        };

        Ok(Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            database_url: env_var("TRENOVA_DATABASE_URL"),
            log_format,
            cdc: CdcConfig::from_env()?,
            streaming: StreamConfig::from_env()?,
            jobs: JobsConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Sets env vars for a test and restores them on drop.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent env access.
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent env access.
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent env access.
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    fn clear(guard: &mut EnvGuard) {
        for key in [
            "TRENOVA_HTTP_PORT",
            "TRENOVA_DATABASE_URL",
            "TRENOVA_LOG_FORMAT",
            "TRENOVA_CDC_ENABLED",
            "TRENOVA_CDC_BROKERS",
            "TRENOVA_CDC_WORKER_COUNT",
            "TRENOVA_STREAM_MAX_CONNECTIONS",
            "TRENOVA_JOBS_CONCURRENCY",
        ] {
            guard.remove(key);
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear(&mut guard);

        let config = Config::from_env().unwrap();
        assert_eq!(config.http_addr.port(), 8080);
        assert!(config.database_url.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.cdc.enabled);
        assert_eq!(config.cdc.brokers, vec!["localhost:9092".to_string()]);
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear(&mut guard);
        guard.set("TRENOVA_HTTP_PORT", "9090");
        guard.set("TRENOVA_DATABASE_URL", "postgres://localhost/trenova");
        guard.set("TRENOVA_LOG_FORMAT", "JSON");

        let config = Config::from_env().unwrap();
        assert_eq!(config.http_addr.port(), 9090);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/trenova")
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_blank_database_url_means_in_memory() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear(&mut guard);
        guard.set("TRENOVA_DATABASE_URL", "  ");

        assert!(Config::from_env().unwrap().database_url.is_none());
    }

    #[test]
    fn test_invalid_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear(&mut guard);
        guard.set("TRENOVA_HTTP_PORT", "not-a-port");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("TRENOVA_HTTP_PORT", _)));
    }

    #[test]
    fn test_invalid_log_format() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear(&mut guard);
        guard.set("TRENOVA_LOG_FORMAT", "xml");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("TRENOVA_LOG_FORMAT", _)));
    }

    #[test]
    fn test_enabled_cdc_requires_brokers() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear(&mut guard);
        guard.set("TRENOVA_CDC_BROKERS", " , ");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TRENOVA_CDC_BROKERS")));

        guard.set("TRENOVA_CDC_ENABLED", "false");
        assert!(Config::from_env().is_ok());
    }

    #[test]
    fn test_subsystem_errors_propagate() {
        let _lock = ENV_MUTEX.lock().unwrap();
        for (key, value) in [
            ("TRENOVA_CDC_WORKER_COUNT", "four"),
            ("TRENOVA_STREAM_MAX_CONNECTIONS", "lots"),
            ("TRENOVA_JOBS_CONCURRENCY", "0"),
        ] {
            let mut guard = EnvGuard::new();
            clear(&mut guard);
            guard.set(key, value);

            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(k, _) if k == key), "{key}={value}");
        }
    }
}
