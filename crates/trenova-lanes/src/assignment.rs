// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Automatic worker assignment for shipments on a dedicated lane.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use trenova_core::TenantScope;
use trenova_core::ports::{
    AssignmentRecord, AssignmentRepository, AssignmentRequest, ShipmentRepository,
};
use trenova_core::shipment::{Shipment, ShipmentStatus};

use crate::error::Result;
use crate::model::LaneKey;
use crate::repository::DedicatedLaneRepository;

/// Assignments made for a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoAssignment {
    /// Lane that matched.
    pub lane_id: String,
    /// One record per move.
    pub assignments: Vec<AssignmentRecord>,
}

/// Assigns a lane's workers to new shipments on that lane.
pub struct AssignmentService {
    lanes: Arc<dyn DedicatedLaneRepository>,
    shipments: Arc<dyn ShipmentRepository>,
    assignments: Arc<dyn AssignmentRepository>,
}

impl AssignmentService {
    /// Create a service over its stores.
    pub fn new(
        lanes: Arc<dyn DedicatedLaneRepository>,
        shipments: Arc<dyn ShipmentRepository>,
        assignments: Arc<dyn AssignmentRepository>,
    ) -> Self {
        Self {
            lanes,
            shipments,
            assignments,
        }
    }

    /// Assign the shipment's moves when an active auto-assign lane matches.
    ///
    /// Returns `Ok(None)` without touching any store when the shipment has
    /// no origin or destination. The shipment is marked `Assigned` only
    /// after the bulk assignment succeeded.
    pub async fn auto_assign(
        &self,
        scope: &TenantScope,
        shipment: &Shipment,
    ) -> Result<Option<AutoAssignment>> {
        let Some(key) = LaneKey::for_shipment(shipment) else {
            debug!(shipment_id = %shipment.id, "Shipment has no origin or destination");
            return Ok(None);
        };

        let lane = match self.lanes.find_by_key(scope, &key).await? {
            Some(lane) if lane.auto_assign => lane,
            Some(lane) => {
                info!(
                    shipment_id = %shipment.id,
                    lane_id = %lane.id,
                    "Dedicated lane found but auto-assign is disabled"
                );
                return Ok(None);
            }
            None => {
                info!(shipment_id = %shipment.id, lane = %key, "No dedicated lane for shipment");
                return Ok(None);
            }
        };

        let request = AssignmentRequest {
            scope: scope.clone(),
            shipment_id: shipment.id.clone(),
            primary_worker_id: lane.primary_worker_id.clone(),
            secondary_worker_id: lane.secondary_worker_id.clone(),
        };
        let assignments = self.assignments.bulk_assign(&request).await?;

        self.shipments
            .update_status(scope, &shipment.id, ShipmentStatus::Assigned)
            .await?;

        info!(
            shipment_id = %shipment.id,
            lane_id = %lane.id,
            moves = assignments.len(),
            "Auto-assigned shipment from dedicated lane"
        );

        Ok(Some(AutoAssignment {
            lane_id: lane.id,
            assignments,
        }))
    }
}
