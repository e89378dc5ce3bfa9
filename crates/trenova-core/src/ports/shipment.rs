// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shipment::{Shipment, ShipmentStatus};
use crate::{Result, TenantScope};

/// Shipments to consider for lane pattern detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternShipmentQuery {
    /// Owning tenant.
    pub scope: TenantScope,
    /// Inclusive lower bound on `created_at`.
    pub start: DateTime<Utc>,
    /// Inclusive upper bound on `created_at`.
    pub end: DateTime<Utc>,
    /// Allowed statuses.
    pub statuses: Vec<ShipmentStatus>,
    /// Restrict to one customer.
    pub customer_id: Option<String>,
}

impl PatternShipmentQuery {
    /// Whether a shipment satisfies this query.
    pub fn matches(&self, shipment: &Shipment) -> bool {
        shipment.organization_id == self.scope.org_id
            && shipment.business_unit_id == self.scope.bu_id
            && self.statuses.contains(&shipment.status)
            && shipment.created_at >= self.start
            && shipment.created_at <= self.end
            && self
                .customer_id
                .as_ref()
                .is_none_or(|c| *c == shipment.customer_id)
    }
}

/// Bulk duplication of an existing shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateRequest {
    /// Owning tenant and acting user.
    pub scope: TenantScope,
    /// Shipment to copy.
    pub shipment_id: String,
    /// Number of copies.
    pub count: usize,
    /// Shift stop dates forward instead of copying them.
    #[serde(default)]
    pub override_dates: bool,
    /// Copy commodities.
    #[serde(default)]
    pub include_commodities: bool,
    /// Copy additional charges.
    #[serde(default)]
    pub include_additional_charges: bool,
}

/// Shipment persistence used by background jobs and pattern detection.
#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    /// Shipments matching a pattern analysis query.
    async fn list_for_pattern_analysis(&self, query: &PatternShipmentQuery) -> Result<Vec<Shipment>>;

    /// Load one shipment with moves and stops.
    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<Shipment>;

    /// Set a shipment's status and return the updated shipment.
    async fn update_status(
        &self,
        scope: &TenantScope,
        id: &str,
        status: ShipmentStatus,
    ) -> Result<Shipment>;

    /// Mark every overdue in-flight shipment (all tenants) as Delayed.
    ///
    /// Returns the shipments that changed.
    async fn delay_overdue_shipments(&self, now: DateTime<Utc>) -> Result<Vec<Shipment>>;

    /// Create `count` copies of a shipment.
    async fn bulk_duplicate(&self, request: &DuplicateRequest) -> Result<Vec<Shipment>>;
}

/// Assign all moves of a shipment to a worker pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    /// Owning tenant and acting user.
    pub scope: TenantScope,
    /// Shipment whose moves are assigned.
    pub shipment_id: String,
    /// Primary worker.
    pub primary_worker_id: String,
    /// Secondary worker.
    pub secondary_worker_id: Option<String>,
}

/// One created assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    /// Assignment ID.
    pub id: String,
    /// Move assigned.
    pub move_id: String,
    /// Primary worker.
    pub primary_worker_id: String,
    /// Secondary worker.
    pub secondary_worker_id: Option<String>,
}

/// Worker assignment persistence.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Assign every move of the shipment.
    async fn bulk_assign(&self, request: &AssignmentRequest) -> Result<Vec<AssignmentRecord>>;
}
