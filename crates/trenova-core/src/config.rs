// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment variable helpers shared by every subsystem config.
//!
//! An unset or blank variable means "use the default". A variable that is
//! set but does not parse is a [`ConfigError::Invalid`].

use std::str::FromStr;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

/// Trimmed value of `key`, or `None` when unset or blank.
pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `key`, falling back to `default` when unset.
pub fn env_parse<T: FromStr>(
    key: &'static str,
    default: T,
    reason: &'static str,
) -> Result<T, ConfigError> {
    match env_var(key) {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid(key, reason)),
        None => Ok(default),
    }
}

/// Parse `key` as an optional value.
pub fn env_parse_opt<T: FromStr>(
    key: &'static str,
    reason: &'static str,
) -> Result<Option<T>, ConfigError> {
    env_var(key)
        .map(|v| v.parse().map_err(|_| ConfigError::Invalid(key, reason)))
        .transpose()
}

/// Parse a positive count, falling back to `default` when unset.
pub fn env_positive<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = env_parse(key, default, "must be a positive integer")?;
    if value <= T::default() {
        return Err(ConfigError::Invalid(key, "must be a positive integer"));
    }
    Ok(value)
}

/// Parse a boolean (`true/false`, `1/0`, `yes/no`, `on/off`).
pub fn env_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env_var(key) {
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(key, "must be true or false")),
        },
        None => Ok(default),
    }
}
