// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pattern analysis service.
//!
//! One run walks every enabled organization config (or the single tenant of
//! the request), loads that tenant's completed and billed shipments, scores
//! recurring routes with [`detection`](crate::detection) and persists a
//! pending suggestion for every pattern that qualifies.
//!
//! Failures are contained per organization and per pattern: a tenant whose
//! shipments cannot be loaded is counted as skipped, and a pattern whose
//! suggestion cannot be stored is counted as a skipped suggestion. Neither
//! aborts the run.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use trenova_core::id::{self, new_id};
use trenova_core::ports::{
    AuditAction, AuditEntry, AuditService, PatternShipmentQuery, ShipmentRepository,
};
use trenova_core::shipment::ShipmentStatus;
use trenova_core::TenantScope;

use crate::config::{PatternConfig, PatternDetectionConfig};
use crate::detection::{filter_patterns, group_shipments};
use crate::error::{LaneError, Result};
use crate::model::{
    DedicatedLaneSuggestion, LaneKey, PatternAnalysisRequest, PatternAnalysisResult, PatternMatch,
    SuggestionStatus,
};
use crate::repository::{
    DedicatedLaneRepository, LocationRepository, PatternConfigRepository, SuggestionRepository,
};

const SUGGESTION_RESOURCE: &str = "dedicated_lane_suggestion";
const PATTERN_CONFIG_RESOURCE: &str = "pattern_config";

/// Statuses of shipments whose routes count towards a pattern.
const ANALYZED_STATUSES: [ShipmentStatus; 2] = [ShipmentStatus::Completed, ShipmentStatus::Billed];

/// Detects recurring routes and turns them into dedicated lane suggestions.
pub struct PatternService {
    shipments: Arc<dyn ShipmentRepository>,
    suggestions: Arc<dyn SuggestionRepository>,
    lanes: Arc<dyn DedicatedLaneRepository>,
    configs: Arc<dyn PatternConfigRepository>,
    locations: Arc<dyn LocationRepository>,
    audit: Arc<dyn AuditService>,
}

impl PatternService {
    /// Create a service over its stores.
    pub fn new(
        shipments: Arc<dyn ShipmentRepository>,
        suggestions: Arc<dyn SuggestionRepository>,
        lanes: Arc<dyn DedicatedLaneRepository>,
        configs: Arc<dyn PatternConfigRepository>,
        locations: Arc<dyn LocationRepository>,
        audit: Arc<dyn AuditService>,
    ) -> Self {
        Self {
            shipments,
            suggestions,
            lanes,
            configs,
            locations,
            audit,
        }
    }

    /// Analyze every enabled organization, or only `request.scope` when set.
    ///
    /// Each organization uses its stored thresholds unless the request
    /// carries an override.
    pub async fn analyze_patterns(
        &self,
        request: &PatternAnalysisRequest,
    ) -> Result<PatternAnalysisResult> {
        let started = Instant::now();

        if let Some(config) = &request.config {
            config.validate()?;
        }

        let configs = match &request.scope {
            Some(scope) => vec![self.config_for(scope).await?],
            None => self.configs.get_all().await?,
        };

        info!(
            organizations = configs.len(),
            start = %request.start,
            end = %request.end,
            "Starting pattern analysis"
        );

        let mut result = PatternAnalysisResult::default();

        for config in configs {
            if !config.enabled {
                result.organizations_skipped += 1;
                info!(
                    organization_id = %config.organization_id,
                    "Pattern analysis disabled for organization, skipping"
                );
                continue;
            }

            let detection = request
                .config
                .clone()
                .unwrap_or_else(|| config.detection_config());

            match self
                .analyze_organization(&config.scope(), &detection, request)
                .await
            {
                Ok(org) => {
                    result.organizations_processed += 1;
                    result.total_patterns_detected += org.total_patterns_detected;
                    result.patterns_above_threshold += org.patterns_above_threshold;
                    result.suggestions_created += org.suggestions_created;
                    result.suggestions_skipped += org.suggestions_skipped;
                    result.configs_used.extend(org.configs_used);
                    result.patterns.extend(org.patterns);
                }
                Err(e) => {
                    result.organizations_skipped += 1;
                    warn!(
                        organization_id = %config.organization_id,
                        business_unit_id = %config.business_unit_id,
                        error = %e,
                        "Failed to analyze organization"
                    );
                }
            }
        }

        result.processing_time_ms = started.elapsed().as_millis() as i64;

        info!(
            organizations_processed = result.organizations_processed,
            organizations_skipped = result.organizations_skipped,
            patterns = result.patterns_above_threshold,
            suggestions_created = result.suggestions_created,
            suggestions_skipped = result.suggestions_skipped,
            processing_time_ms = result.processing_time_ms,
            "Pattern analysis completed"
        );

        Ok(result)
    }

    /// Analyze one tenant with the given thresholds.
    ///
    /// Errors loading shipments are returned; errors persisting individual
    /// suggestions are counted in `suggestions_skipped`.
    pub async fn analyze_organization(
        &self,
        scope: &TenantScope,
        config: &PatternDetectionConfig,
        request: &PatternAnalysisRequest,
    ) -> Result<PatternAnalysisResult> {
        let now = Utc::now();
        let query = PatternShipmentQuery {
            scope: scope.clone(),
            start: request.start,
            end: request.end,
            statuses: ANALYZED_STATUSES.to_vec(),
            customer_id: request.customer_id.clone(),
        };

        let shipments = self.shipments.list_for_pattern_analysis(&query).await?;

        let mut result = PatternAnalysisResult {
            organizations_processed: 1,
            configs_used: vec![config.clone()],
            ..Default::default()
        };

        if shipments.is_empty() {
            info!(tenant = %scope, "No shipments in analysis window");
            return Ok(result);
        }

        let patterns = group_shipments(&shipments, config, now);
        result.total_patterns_detected = patterns.len() as i64;

        let mut qualified = filter_patterns(patterns, config);
        if request.exclude_existing {
            qualified = self.exclude_existing(scope, qualified).await;
        }
        result.patterns_above_threshold = qualified.len() as i64;

        for pattern in &qualified {
            match self
                .create_suggestion(scope, pattern, config, request, now)
                .await
            {
                Ok(suggestion) => {
                    result.suggestions_created += 1;
                    debug!(
                        suggestion_id = %suggestion.id,
                        lane = %suggestion.key,
                        confidence = %suggestion.confidence_score,
                        "Created dedicated lane suggestion"
                    );
                }
                Err(LaneError::DuplicatePattern(lane)) => {
                    result.suggestions_skipped += 1;
                    info!(lane = %lane, "Pending suggestion already exists, skipping");
                }
                Err(e) => {
                    result.suggestions_skipped += 1;
                    warn!(lane = %pattern.key, error = %e, "Failed to create suggestion");
                }
            }
        }

        info!(
            tenant = %scope,
            shipments = shipments.len(),
            patterns = result.patterns_above_threshold,
            created = result.suggestions_created,
            skipped = result.suggestions_skipped,
            "Completed organization pattern analysis"
        );

        result.patterns = qualified;
        Ok(result)
    }

    /// Replace a tenant's thresholds and enabled flag.
    pub async fn update_pattern_config(
        &self,
        scope: &TenantScope,
        detection: PatternDetectionConfig,
        enabled: bool,
    ) -> Result<PatternConfig> {
        detection.validate()?;

        let original = match self.configs.get_by_org(scope).await {
            Ok(config) => Some(config),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let mut config = original
            .clone()
            .unwrap_or_else(|| PatternConfig::new(new_id("pc"), scope, detection.clone()));
        config.detection = detection;
        config.enabled = enabled;
        config.updated_at = Utc::now();

        let updated = self.configs.upsert(&config).await?;

        let mut entry = AuditEntry::new(
            scope.clone(),
            PATTERN_CONFIG_RESOURCE,
            &updated.id,
            AuditAction::Update,
            "Pattern config updated",
        )
        .with_current(serde_json::to_value(&updated)?);
        if let Some(original) = &original {
            entry = entry.with_previous(serde_json::to_value(original)?);
        }
        if let Err(e) = self.audit.log_action(entry).await {
            warn!(config_id = %updated.id, error = %e, "Failed to log pattern config update");
        }

        Ok(updated)
    }

    /// Stored config of a tenant, or enabled defaults when it has none.
    async fn config_for(&self, scope: &TenantScope) -> Result<PatternConfig> {
        match self.configs.get_by_org(scope).await {
            Ok(config) => Ok(config),
            Err(e) if e.is_not_found() => Ok(PatternConfig::new(
                new_id("pc"),
                scope,
                PatternDetectionConfig::default(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Drop patterns already covered by an active lane or pending suggestion.
    ///
    /// A pattern whose lookup fails is dropped as well.
    async fn exclude_existing(
        &self,
        scope: &TenantScope,
        patterns: Vec<PatternMatch>,
    ) -> Vec<PatternMatch> {
        let before = patterns.len();
        let mut kept = Vec::with_capacity(before);

        for pattern in patterns {
            match self.is_covered(scope, &pattern.key).await {
                Ok(false) => kept.push(pattern),
                Ok(true) => debug!(lane = %pattern.key, "Pattern already covered, excluding"),
                Err(e) => warn!(
                    lane = %pattern.key,
                    error = %e,
                    "Failed to check existing lanes, excluding pattern"
                ),
            }
        }

        debug!(
            excluded = before - kept.len(),
            remaining = kept.len(),
            "Completed pattern exclusion check"
        );
        kept
    }

    async fn is_covered(&self, scope: &TenantScope, key: &LaneKey) -> Result<bool> {
        if self.lanes.find_by_key(scope, key).await?.is_some() {
            return Ok(true);
        }
        Ok(self
            .suggestions
            .find_pending_duplicate(scope, key)
            .await?
            .is_some())
    }

    async fn create_suggestion(
        &self,
        scope: &TenantScope,
        pattern: &PatternMatch,
        config: &PatternDetectionConfig,
        request: &PatternAnalysisRequest,
        now: DateTime<Utc>,
    ) -> Result<DedicatedLaneSuggestion> {
        // Re-checked here since an earlier pattern in this run may have
        // produced the same key.
        if let Some(existing) = self
            .suggestions
            .find_pending_duplicate(scope, &pattern.key)
            .await?
        {
            debug!(existing_id = %existing.id, "Found pending duplicate");
            return Err(LaneError::DuplicatePattern(pattern.key.to_string()));
        }

        let expires_at = config.suggestion_expiry(now)?;
        let suggestion = DedicatedLaneSuggestion {
            id: new_id(id::SUGGESTION),
            organization_id: scope.org_id.clone(),
            business_unit_id: scope.bu_id.clone(),
            status: SuggestionStatus::Pending,
            key: pattern.key.clone(),
            confidence_score: pattern.confidence,
            frequency: pattern.frequency,
            avg_freight_charge: pattern.avg_freight_charge,
            total_freight_value: pattern.total_freight_value,
            first_shipment_date: pattern.first_shipment_date,
            last_shipment_date: pattern.last_shipment_date,
            analysis_start_date: request.start,
            analysis_end_date: request.end,
            suggested_name: self.suggested_name(scope, &pattern.key).await,
            pattern_details: pattern_details(pattern, config, now)?,
            expires_at,
            processed_by_id: None,
            processed_at: None,
            created_dedicated_lane_id: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.suggestions.create(&suggestion).await?;

        let entry = AuditEntry::new(
            scope.clone(),
            SUGGESTION_RESOURCE,
            &created.id,
            AuditAction::Create,
            "Dedicated lane suggestion created",
        )
        .with_current(serde_json::to_value(&created)?);
        if let Err(e) = self.audit.log_action(entry).await {
            warn!(suggestion_id = %created.id, error = %e, "Failed to log suggestion creation");
        }

        Ok(created)
    }

    /// `Lane-{origin code}-to-{destination code}`, or empty when either
    /// location cannot be loaded.
    async fn suggested_name(&self, scope: &TenantScope, key: &LaneKey) -> String {
        let origin = self.locations.get_by_id(scope, &key.origin_location_id).await;
        let destination = self
            .locations
            .get_by_id(scope, &key.destination_location_id)
            .await;

        match (origin, destination) {
            (Ok(o), Ok(d)) => format!("Lane-{}-to-{}", o.code, d.code),
            (Err(e), _) | (_, Err(e)) => {
                debug!(lane = %key, error = %e, "Location lookup failed, leaving name empty");
                String::new()
            }
        }
    }
}

fn pattern_details(
    pattern: &PatternMatch,
    config: &PatternDetectionConfig,
    now: DateTime<Utc>,
) -> Result<Value> {
    let mut details = Map::new();
    details.insert("shipmentIds".into(), json!(pattern.shipment_ids));
    details.insert("analysisConfig".into(), serde_json::to_value(config)?);
    details.insert("detectionTime".into(), json!(now.timestamp()));
    details.insert("analysisType".into(), json!("organization-specific"));
    if let Some(avg) = pattern.avg_freight_charge {
        details.insert("avgFreightCharge".into(), serde_json::to_value(avg)?);
    }
    if let Some(total) = pattern.total_freight_value {
        details.insert("totalFreightValue".into(), serde_json::to_value(total)?);
    }
    Ok(Value::Object(details))
}
