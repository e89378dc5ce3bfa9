// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pattern detection configuration.
//!
//! [`PatternDetectionConfig`] holds the thresholds one analysis run uses.
//! [`PatternConfig`] is the per-organization row that enables analysis and
//! stores those thresholds.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trenova_core::config::env_parse_opt;
use trenova_core::{ConfigError, TenantScope};

use crate::error::{LaneError, Result};

/// Longest accepted analysis window.
pub const MAX_ANALYSIS_WINDOW_DAYS: i64 = 3650;

/// Longest accepted suggestion lifetime.
pub const MAX_SUGGESTION_TTL_DAYS: i64 = 3650;

/// Thresholds for one pattern analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDetectionConfig {
    /// Minimum shipments for a pattern to qualify.
    pub min_frequency: i64,
    /// Length of the trailing analysis window.
    pub analysis_window_days: i64,
    /// Minimum confidence in `[0, 1]`.
    pub min_confidence_score: Decimal,
    /// Days until a new suggestion expires.
    #[serde(rename = "suggestionTTLDays")]
    pub suggestion_ttl_days: i64,
    /// Include service, shipment and equipment types in the pattern key.
    pub require_exact_match: bool,
    /// Let recency contribute to the confidence score.
    pub weight_recent_shipments: bool,
}

impl Default for PatternDetectionConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl PatternDetectionConfig {
    /// Few, high-confidence suggestions.
    pub fn conservative() -> Self {
        Self {
            min_frequency: 5,
            analysis_window_days: 120,
            min_confidence_score: Decimal::new(8, 1),
            suggestion_ttl_days: 45,
            require_exact_match: true,
            weight_recent_shipments: true,
        }
    }

    /// Balanced defaults.
    pub fn standard() -> Self {
        Self {
            min_frequency: 3,
            analysis_window_days: 90,
            min_confidence_score: Decimal::new(65, 2),
            suggestion_ttl_days: 30,
            require_exact_match: true,
            weight_recent_shipments: true,
        }
    }

    /// Many suggestions, looser grouping.
    pub fn aggressive() -> Self {
        Self {
            min_frequency: 2,
            analysis_window_days: 60,
            min_confidence_score: Decimal::new(5, 1),
            suggestion_ttl_days: 14,
            require_exact_match: false,
            weight_recent_shipments: true,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "conservative" => Some(Self::conservative()),
            "standard" => Some(Self::standard()),
            "aggressive" => Some(Self::aggressive()),
            _ => None,
        }
    }

    /// Standard preset with `TRENOVA_PATTERN_MIN_FREQUENCY` applied.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let defaults = Self::standard();
        let min_frequency = match env_parse_opt::<i64>(
            "TRENOVA_PATTERN_MIN_FREQUENCY",
            "must be a positive integer",
        )? {
            Some(n) if n < 1 => {
                return Err(ConfigError::Invalid(
                    "TRENOVA_PATTERN_MIN_FREQUENCY",
                    "must be a positive integer",
                ));
            }
            Some(n) => n,
            None => defaults.min_frequency,
        };
        Ok(Self {
            min_frequency,
            ..defaults
        })
    }

    /// Reject out-of-range thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.min_frequency < 1 {
            return Err(LaneError::invalid_config("minFrequency", "must be at least 1"));
        }
        if !(1..=MAX_ANALYSIS_WINDOW_DAYS).contains(&self.analysis_window_days) {
            return Err(LaneError::invalid_config(
                "analysisWindowDays",
                format!("must be between 1 and {MAX_ANALYSIS_WINDOW_DAYS} days"),
            ));
        }
        if self.min_confidence_score < Decimal::ZERO || self.min_confidence_score > Decimal::ONE {
            return Err(LaneError::invalid_config(
                "minConfidenceScore",
                "must be between 0 and 1",
            ));
        }
        if !(1..=MAX_SUGGESTION_TTL_DAYS).contains(&self.suggestion_ttl_days) {
            return Err(LaneError::invalid_config(
                "suggestionTTLDays",
                format!("must be between 1 and {MAX_SUGGESTION_TTL_DAYS} days"),
            ));
        }
        Ok(())
    }

    /// Expiry of a suggestion created at `now`.
    ///
    /// Stored configs may predate the TTL bound, so overflow is an error
    /// rather than a panic.
    pub fn suggestion_expiry(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        Duration::try_days(self.suggestion_ttl_days)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                LaneError::invalid_config("suggestionTTLDays", "expiry is out of range")
            })
    }
}

/// Per-organization pattern analysis settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternConfig {
    /// Config ID.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Owning business unit.
    pub business_unit_id: String,
    /// Whether scheduled analysis runs for this organization.
    pub enabled: bool,
    /// Thresholds.
    #[serde(flatten)]
    pub detection: PatternDetectionConfig,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl PatternConfig {
    /// An enabled config for `scope` with the given thresholds.
    pub fn new(id: impl Into<String>, scope: &TenantScope, detection: PatternDetectionConfig) -> Self {
        Self {
            id: id.into(),
            organization_id: scope.org_id.clone(),
            business_unit_id: scope.bu_id.clone(),
            enabled: true,
            detection,
            updated_at: Utc::now(),
        }
    }

    /// Tenant the config belongs to, acting as the system.
    pub fn scope(&self) -> TenantScope {
        TenantScope::system(&self.organization_id, &self.business_unit_id)
    }

    /// Thresholds to run detection with.
    pub fn detection_config(&self) -> PatternDetectionConfig {
        self.detection.clone()
    }
}
