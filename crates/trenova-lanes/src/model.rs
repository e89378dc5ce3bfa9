// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Suggestion, lane and pattern types.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use trenova_core::TenantScope;
use trenova_core::shipment::Shipment;

use crate::config::PatternDetectionConfig;

/// Lifecycle of a dedicated lane suggestion.
///
/// `Pending` is the only non-terminal state; every transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuggestionStatus {
    /// Awaiting an operator decision.
    Pending,
    /// Turned into a dedicated lane.
    Accepted,
    /// Declined by an operator.
    Rejected,
    /// Not decided before `expires_at`.
    Expired,
}

impl SuggestionStatus {
    /// Wire and column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
            Self::Expired => "Expired",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(&self, next: SuggestionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted | Self::Rejected | Self::Expired)
        )
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Accepted" => Ok(Self::Accepted),
            "Rejected" => Ok(Self::Rejected),
            "Expired" => Ok(Self::Expired),
            other => Err(format!("unknown suggestion status: {}", other)),
        }
    }
}

/// Whether a dedicated lane is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaneStatus {
    /// Matched by auto-assignment and pattern exclusion.
    Active,
    /// Kept for history only.
    Inactive,
}

impl LaneStatus {
    /// Wire and column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }
}

impl FromStr for LaneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown lane status: {}", other)),
        }
    }
}

/// Route and equipment fingerprint shared by patterns, suggestions and lanes.
///
/// Optional parts compare NULL-aware: `None` only matches `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneKey {
    /// Customer.
    pub customer_id: String,
    /// First stop of the first move.
    pub origin_location_id: String,
    /// Last stop of the last move.
    pub destination_location_id: String,
    /// Service type.
    pub service_type_id: Option<String>,
    /// Shipment type.
    pub shipment_type_id: Option<String>,
    /// Trailer type.
    pub trailer_type_id: Option<String>,
    /// Tractor type.
    pub tractor_type_id: Option<String>,
}

impl LaneKey {
    /// Key of a shipment, or `None` when it lacks an origin or destination.
    pub fn for_shipment(shipment: &Shipment) -> Option<Self> {
        let (Some(origin), Some(destination)) = shipment.origin_destination() else {
            return None;
        };
        Some(Self {
            customer_id: shipment.customer_id.clone(),
            origin_location_id: origin.to_string(),
            destination_location_id: destination.to_string(),
            service_type_id: shipment.service_type_id.clone(),
            shipment_type_id: shipment.shipment_type_id.clone(),
            trailer_type_id: shipment.trailer_type_id.clone(),
            tractor_type_id: shipment.tractor_type_id.clone(),
        })
    }

    /// Grouping key `org|customer|origin|dest[|service|shipmentType|trailer|tractor]`.
    ///
    /// Absent equipment parts are left out rather than written empty.
    pub fn fingerprint(&self, organization_id: &str, exact: bool) -> String {
        let mut key = format!(
            "{}|{}|{}|{}",
            organization_id, self.customer_id, self.origin_location_id, self.destination_location_id
        );
        if exact {
            for part in [
                &self.service_type_id,
                &self.shipment_type_id,
                &self.trailer_type_id,
                &self.tractor_type_id,
            ]
            .into_iter()
            .flatten()
            {
                key.push('|');
                key.push_str(part);
            }
        }
        key
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "customer {} {} -> {}",
            self.customer_id, self.origin_location_id, self.destination_location_id
        )
    }
}

/// A recurring route found in historical shipments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatch {
    /// Owning organization.
    pub organization_id: String,
    /// Owning business unit.
    pub business_unit_id: String,
    /// Route and equipment, taken from the first shipment of the group.
    #[serde(flatten)]
    pub key: LaneKey,
    /// Shipments in the group.
    pub frequency: i64,
    /// Shipment IDs in the order they were seen.
    pub shipment_ids: Vec<String>,
    /// Earliest `created_at` in the group.
    pub first_shipment_date: DateTime<Utc>,
    /// Latest `created_at` in the group.
    pub last_shipment_date: DateTime<Utc>,
    /// Sum of freight charges, when any shipment has one.
    pub total_freight_value: Option<Decimal>,
    /// `total_freight_value / frequency`.
    pub avg_freight_charge: Option<Decimal>,
    /// Score in `[0, 1]`.
    pub confidence: Decimal,
}

impl PatternMatch {
    /// Tenant of the pattern, acting as the system.
    pub fn scope(&self) -> TenantScope {
        TenantScope::system(&self.organization_id, &self.business_unit_id)
    }
}

/// Parameters of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysisRequest {
    /// Inclusive window start.
    pub start: DateTime<Utc>,
    /// Inclusive window end.
    pub end: DateTime<Utc>,
    /// Restrict to one customer.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Drop patterns that already have an active lane or pending suggestion.
    #[serde(default)]
    pub exclude_existing: bool,
    /// Restrict to one tenant. All enabled configs are analyzed when unset.
    #[serde(default)]
    pub scope: Option<TenantScope>,
    /// Override every organization's stored thresholds.
    #[serde(default)]
    pub config: Option<PatternDetectionConfig>,
}

impl PatternAnalysisRequest {
    /// A request covering the `days` before `now`.
    ///
    /// A window reaching past the earliest representable time starts there.
    pub fn trailing(days: i64, now: DateTime<Utc>) -> Self {
        let start = Duration::try_days(days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            start,
            end: now,
            customer_id: None,
            exclude_existing: true,
            scope: None,
            config: None,
        }
    }

    /// Restrict to one tenant.
    pub fn for_tenant(mut self, scope: TenantScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Restrict to one customer.
    pub fn for_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// Use these thresholds for every organization.
    pub fn with_config(mut self, config: PatternDetectionConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Outcome of an analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysisResult {
    /// Patterns found before thresholds.
    pub total_patterns_detected: i64,
    /// Patterns that passed thresholds and exclusion.
    pub patterns_above_threshold: i64,
    /// Suggestions persisted.
    pub suggestions_created: i64,
    /// Qualified patterns not persisted (duplicate or store error).
    pub suggestions_skipped: i64,
    /// Organizations analyzed.
    pub organizations_processed: i64,
    /// Disabled or failed organizations.
    pub organizations_skipped: i64,
    /// Thresholds used, one per analyzed organization.
    pub configs_used: Vec<PatternDetectionConfig>,
    /// Qualified patterns, highest confidence first per organization.
    pub patterns: Vec<PatternMatch>,
    /// Wall time of the run.
    pub processing_time_ms: i64,
}

/// A proposed dedicated lane awaiting an operator decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedicatedLaneSuggestion {
    /// Suggestion ID.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Owning business unit.
    pub business_unit_id: String,
    /// Lifecycle status.
    pub status: SuggestionStatus,
    /// Route and equipment.
    #[serde(flatten)]
    pub key: LaneKey,
    /// Pattern confidence.
    pub confidence_score: Decimal,
    /// Shipments behind the pattern.
    pub frequency: i64,
    /// Average freight charge.
    pub avg_freight_charge: Option<Decimal>,
    /// Total freight value.
    pub total_freight_value: Option<Decimal>,
    /// Earliest shipment of the pattern.
    pub first_shipment_date: DateTime<Utc>,
    /// Latest shipment of the pattern.
    pub last_shipment_date: DateTime<Utc>,
    /// Analysis window start.
    pub analysis_start_date: DateTime<Utc>,
    /// Analysis window end.
    pub analysis_end_date: DateTime<Utc>,
    /// Generated lane name (`Lane-{origin}-to-{dest}`), possibly empty.
    pub suggested_name: String,
    /// Shipment IDs, thresholds and detection metadata.
    pub pattern_details: Value,
    /// Pending suggestions past this instant are expired.
    pub expires_at: DateTime<Utc>,
    /// Operator who accepted or rejected.
    pub processed_by_id: Option<String>,
    /// When it was accepted or rejected.
    pub processed_at: Option<DateTime<Utc>>,
    /// Lane created on acceptance.
    pub created_dedicated_lane_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl DedicatedLaneSuggestion {
    /// Tenant of the suggestion, acting as the system.
    pub fn scope(&self) -> TenantScope {
        TenantScope::system(&self.organization_id, &self.business_unit_id)
    }

    /// Whether the suggestion can no longer be accepted.
    ///
    /// A pending suggestion may still be accepted at exactly `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SuggestionStatus::Expired
            || (self.status == SuggestionStatus::Pending && self.expires_at < now)
    }

    /// Whether an operator already decided.
    pub fn is_processed(&self) -> bool {
        matches!(
            self.status,
            SuggestionStatus::Accepted | SuggestionStatus::Rejected
        )
    }
}

/// A standing assignment of workers to a recurring route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedicatedLane {
    /// Lane ID.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Owning business unit.
    pub business_unit_id: String,
    /// Display name.
    pub name: String,
    /// Whether the lane is in use.
    pub status: LaneStatus,
    /// Route and equipment.
    #[serde(flatten)]
    pub key: LaneKey,
    /// Primary worker.
    pub primary_worker_id: String,
    /// Secondary worker.
    pub secondary_worker_id: Option<String>,
    /// Assign matching new shipments automatically.
    pub auto_assign: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// The fields of a location used to name lanes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Location ID.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Owning business unit.
    pub business_unit_id: String,
    /// Short code.
    pub code: String,
    /// Display name.
    pub name: String,
}

/// Operator decision to turn a suggestion into a lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptSuggestionRequest {
    /// Tenant and acting operator.
    pub scope: TenantScope,
    /// Suggestion to accept.
    pub suggestion_id: String,
    /// Lane name; the suggested name is used when empty or unset.
    #[serde(default)]
    pub dedicated_lane_name: Option<String>,
    /// Primary worker.
    pub primary_worker_id: String,
    /// Secondary worker.
    #[serde(default)]
    pub secondary_worker_id: Option<String>,
    /// Assign matching new shipments automatically.
    #[serde(default)]
    pub auto_assign: bool,
}

/// Operator decision to decline a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectSuggestionRequest {
    /// Tenant and acting operator.
    pub scope: TenantScope,
    /// Suggestion to reject.
    pub suggestion_id: String,
    /// Free-text reason.
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> LaneKey {
        LaneKey {
            customer_id: "cus_1".into(),
            origin_location_id: "loc_o".into(),
            destination_location_id: "loc_d".into(),
            service_type_id: Some("svc".into()),
            shipment_type_id: Some("st".into()),
            trailer_type_id: None,
            tractor_type_id: Some("rt".into()),
        }
    }

    #[test]
    fn test_lifecycle_edges() {
        use SuggestionStatus::*;
        for next in [Accepted, Rejected, Expired] {
            assert!(Pending.can_transition_to(next));
        }
        for from in [Accepted, Rejected, Expired] {
            assert!(from.is_terminal());
            for next in [Pending, Accepted, Rejected, Expired] {
                assert!(!from.can_transition_to(next), "{from} -> {next}");
            }
        }
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_status_roundtrip_names() {
        assert_eq!("Expired".parse::<SuggestionStatus>(), Ok(SuggestionStatus::Expired));
        assert!("expired".parse::<SuggestionStatus>().is_err());
        assert_eq!("Inactive".parse::<LaneStatus>(), Ok(LaneStatus::Inactive));
    }

    #[test]
    fn test_fingerprint() {
        let key = key();
        assert_eq!(key.fingerprint("org", false), "org|cus_1|loc_o|loc_d");
        assert_eq!(key.fingerprint("org", true), "org|cus_1|loc_o|loc_d|svc|st|rt");
    }

    #[test]
    fn test_key_serializes_flat_in_lane() {
        let now = Utc::now();
        let lane = DedicatedLane {
            id: "dl_1".into(),
            organization_id: "org".into(),
            business_unit_id: "bu".into(),
            name: "Lane".into(),
            status: LaneStatus::Active,
            key: key(),
            primary_worker_id: "W1".into(),
            secondary_worker_id: None,
            auto_assign: true,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&lane).unwrap();
        assert_eq!(json["originLocationId"], "loc_o");
        assert_eq!(json["status"], "Active");
        assert!(json["trailerTypeId"].is_null());
    }

    #[test]
    fn test_trailing_request() {
        let now = Utc::now();
        let req = PatternAnalysisRequest::trailing(90, now).for_customer("cus_1");
        assert_eq!(req.end - req.start, Duration::days(90));
        assert!(req.exclude_existing);
        assert_eq!(req.customer_id.as_deref(), Some("cus_1"));

        let unbounded = PatternAnalysisRequest::trailing(i64::MAX, now);
        assert_eq!(unbounded.start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(unbounded.end, now);
    }
}
