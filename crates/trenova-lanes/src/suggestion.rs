// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator decisions on dedicated lane suggestions.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};
use trenova_core::TenantScope;
use trenova_core::id::{self, new_id};
use trenova_core::ports::{AuditAction, AuditEntry, AuditService};

use crate::error::{LaneError, Result};
use crate::model::{
    AcceptSuggestionRequest, DedicatedLane, DedicatedLaneSuggestion, LaneStatus,
    RejectSuggestionRequest, SuggestionStatus,
};
use crate::repository::{DedicatedLaneRepository, SuggestionRepository};

const SUGGESTION_RESOURCE: &str = "dedicated_lane_suggestion";
const LANE_RESOURCE: &str = "dedicated_lane";

/// Accepts, rejects and expires suggestions.
pub struct SuggestionService {
    suggestions: Arc<dyn SuggestionRepository>,
    lanes: Arc<dyn DedicatedLaneRepository>,
    audit: Arc<dyn AuditService>,
}

impl SuggestionService {
    /// Create a service over its stores.
    pub fn new(
        suggestions: Arc<dyn SuggestionRepository>,
        lanes: Arc<dyn DedicatedLaneRepository>,
        audit: Arc<dyn AuditService>,
    ) -> Self {
        Self {
            suggestions,
            lanes,
            audit,
        }
    }

    /// Suggestions of a tenant, newest first.
    pub async fn list(
        &self,
        scope: &TenantScope,
        status: Option<SuggestionStatus>,
    ) -> Result<Vec<DedicatedLaneSuggestion>> {
        self.suggestions.list(scope, status).await
    }

    /// One suggestion.
    pub async fn get(&self, scope: &TenantScope, id: &str) -> Result<DedicatedLaneSuggestion> {
        self.suggestions.get_by_id(scope, id).await
    }

    /// Turn a pending suggestion into an active dedicated lane.
    ///
    /// The lane inherits the suggestion's route and equipment. Once the lane
    /// exists the call succeeds even if marking the suggestion accepted or
    /// writing the audit trail fails; both are logged.
    pub async fn accept(&self, request: &AcceptSuggestionRequest) -> Result<DedicatedLane> {
        let now = Utc::now();
        let mut suggestion = self
            .suggestions
            .get_by_id(&request.scope, &request.suggestion_id)
            .await?;

        if suggestion.is_expired(now) {
            return Err(LaneError::Expired(suggestion.id));
        }
        if suggestion.is_processed() {
            return Err(LaneError::AlreadyProcessed {
                id: suggestion.id,
                status: suggestion.status,
            });
        }

        let name = request
            .dedicated_lane_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&suggestion.suggested_name)
            .to_string();

        let lane = DedicatedLane {
            id: new_id(id::DEDICATED_LANE),
            organization_id: request.scope.org_id.clone(),
            business_unit_id: request.scope.bu_id.clone(),
            name,
            status: LaneStatus::Active,
            key: suggestion.key.clone(),
            primary_worker_id: request.primary_worker_id.clone(),
            secondary_worker_id: request.secondary_worker_id.clone(),
            auto_assign: request.auto_assign,
            created_at: now,
            updated_at: now,
        };
        let created = self.lanes.create(&lane).await?;

        let previous = serde_json::to_value(&suggestion)?;
        suggestion.status = SuggestionStatus::Accepted;
        suggestion.processed_by_id = Some(request.scope.user_id.clone());
        suggestion.processed_at = Some(now);
        suggestion.created_dedicated_lane_id = Some(created.id.clone());

        match self.suggestions.update(&suggestion).await {
            Ok(updated) => {
                self.record(
                    AuditEntry::new(
                        request.scope.clone(),
                        SUGGESTION_RESOURCE,
                        &updated.id,
                        AuditAction::Approve,
                        "Dedicated lane suggestion accepted",
                    )
                    .with_previous(previous)
                    .with_current(serde_json::to_value(&updated)?),
                )
                .await;
            }
            // TODO: delete the created lane here once the lane store
            // supports removal, so a lost decision race leaves no orphan.
            Err(e) => warn!(
                suggestion_id = %suggestion.id,
                lane_id = %created.id,
                error = %e,
                "Failed to mark suggestion accepted"
            ),
        }

        self.record(
            AuditEntry::new(
                request.scope.clone(),
                LANE_RESOURCE,
                &created.id,
                AuditAction::Create,
                format!("Dedicated lane created from suggestion {}", suggestion.id),
            )
            .with_current(serde_json::to_value(&created)?),
        )
        .await;

        info!(
            suggestion_id = %suggestion.id,
            lane_id = %created.id,
            "Suggestion accepted and dedicated lane created"
        );

        Ok(created)
    }

    /// Decline a pending suggestion.
    ///
    /// A non-empty reason is kept in the suggestion's pattern details as
    /// `rejectReason` together with `rejectedAt`.
    pub async fn reject(&self, request: &RejectSuggestionRequest) -> Result<DedicatedLaneSuggestion> {
        let now = Utc::now();
        let mut suggestion = self
            .suggestions
            .get_by_id(&request.scope, &request.suggestion_id)
            .await?;

        if suggestion.status.is_terminal() {
            return Err(LaneError::AlreadyProcessed {
                id: suggestion.id,
                status: suggestion.status,
            });
        }

        let previous = serde_json::to_value(&suggestion)?;
        suggestion.status = SuggestionStatus::Rejected;
        suggestion.processed_by_id = Some(request.scope.user_id.clone());
        suggestion.processed_at = Some(now);

        if let Some(reason) = request.reason.as_deref().filter(|r| !r.is_empty()) {
            if !suggestion.pattern_details.is_object() {
                suggestion.pattern_details = Value::Object(Default::default());
            }
            if let Some(details) = suggestion.pattern_details.as_object_mut() {
                details.insert("rejectReason".into(), json!(reason));
                details.insert("rejectedAt".into(), json!(now.timestamp()));
            }
        }

        let updated = self.suggestions.update(&suggestion).await?;

        self.record(
            AuditEntry::new(
                request.scope.clone(),
                SUGGESTION_RESOURCE,
                &updated.id,
                AuditAction::Reject,
                "Dedicated lane suggestion rejected",
            )
            .with_previous(previous)
            .with_current(serde_json::to_value(&updated)?),
        )
        .await;

        info!(suggestion_id = %updated.id, "Suggestion rejected");
        Ok(updated)
    }

    /// Expire pending suggestions past their TTL.
    ///
    /// `None` sweeps every tenant.
    pub async fn expire_old_suggestions(
        &self,
        scope: Option<&TenantScope>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let expired = self.suggestions.expire_old_suggestions(scope, now).await?;
        if expired > 0 {
            info!(expired, "Expired old dedicated lane suggestions");
        }
        Ok(expired)
    }

    async fn record(&self, entry: AuditEntry) {
        let resource_id = entry.resource_id.clone();
        if let Err(e) = self.audit.log_action(entry).await {
            warn!(resource_id = %resource_id, error = %e, "Failed to write audit entry");
        }
    }
}
