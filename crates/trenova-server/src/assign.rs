// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Auto-assignment hook on captured shipment inserts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use trenova_cdc::handlers::shipments::{SHIPMENTS, ShipmentRecord};
use trenova_cdc::{CdcError, CdcEventHandler, ChangeEvent, Operation};
use trenova_core::TenantScope;
use trenova_core::ports::ShipmentRepository;
use trenova_core::shipment::ShipmentStatus;
use trenova_lanes::AssignmentService;

/// Runs [`AssignmentService::auto_assign`] for every newly created shipment.
///
/// The captured row only carries scalar columns, so the full shipment with
/// its moves is reloaded from the store before matching against lanes.
pub struct AutoAssignHandler {
    assignments: Arc<AssignmentService>,
    shipments: Arc<dyn ShipmentRepository>,
}

impl AutoAssignHandler {
    /// Create a hook over the assignment service and shipment store.
    pub fn new(assignments: Arc<AssignmentService>, shipments: Arc<dyn ShipmentRepository>) -> Self {
        Self {
            assignments,
            shipments,
        }
    }
}

#[async_trait]
impl CdcEventHandler for AutoAssignHandler {
    fn table_name(&self) -> &str {
        SHIPMENTS
    }

    async fn handle_event(&self, event: &ChangeEvent) -> trenova_cdc::Result<()> {
        if event.operation != Operation::Create {
            return Ok(());
        }
        let after = event
            .after
            .as_ref()
            .ok_or_else(|| CdcError::invalid("create event missing after data"))?;
        let record = ShipmentRecord::from_row(after)?;
        let scope = TenantScope::system(&record.organization_id, &record.business_unit_id);

        let shipment = match self.shipments.get_by_id(&scope, &record.id).await {
            Ok(shipment) => shipment,
            Err(e) if e.is_not_found() => {
                warn!(shipment_id = %record.id, "Created shipment not found, skipping auto-assign");
                return Ok(());
            }
            Err(e) => return Err(CdcError::handler(SHIPMENTS, format!("load shipment: {e}"))),
        };

        if shipment.status != ShipmentStatus::New {
            debug!(
                shipment_id = %shipment.id,
                status = ?shipment.status,
                "Shipment is no longer new, skipping auto-assign"
            );
            return Ok(());
        }

        match self.assignments.auto_assign(&scope, &shipment).await {
            Ok(Some(assigned)) => {
                info!(
                    shipment_id = %shipment.id,
                    lane_id = %assigned.lane_id,
                    "Shipment auto-assigned on creation"
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(CdcError::handler(SHIPMENTS, format!("auto-assign: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{Value, json};
    use trenova_cdc::{EventMetadata, SourceInfo};
    use trenova_core::ports::memory::{InMemoryShipmentRepository, RecordingAssignmentRepository};
    use trenova_core::shipment::{Shipment, ShipmentMove, Stop, StopType};
    use trenova_lanes::{
        DedicatedLane, DedicatedLaneRepository, InMemoryDedicatedLaneRepository, LaneKey,
        LaneStatus,
    };

    struct Harness {
        shipments: Arc<InMemoryShipmentRepository>,
        assignments: Arc<RecordingAssignmentRepository>,
        lanes: Arc<InMemoryDedicatedLaneRepository>,
        handler: AutoAssignHandler,
    }

    fn harness() -> Harness {
        let shipments = Arc::new(InMemoryShipmentRepository::new());
        let assignments = Arc::new(RecordingAssignmentRepository::new());
        let lanes = Arc::new(InMemoryDedicatedLaneRepository::new());
        let service = Arc::new(AssignmentService::new(
            lanes.clone(),
            shipments.clone(),
            assignments.clone(),
        ));
        Harness {
            handler: AutoAssignHandler::new(service, shipments.clone()),
            shipments,
            assignments,
            lanes,
        }
    }

    fn stop(id: &str, location: &str, sequence: i32, stop_type: StopType) -> Stop {
        Stop {
            id: id.into(),
            sequence,
            stop_type,
            location_id: location.into(),
            planned_arrival: None,
            planned_departure: None,
            actual_arrival: None,
            actual_departure: None,
        }
    }

    fn shipment(status: ShipmentStatus) -> Shipment {
        let now = Utc::now();
        Shipment {
            id: "shp_1".into(),
            organization_id: "org_a".into(),
            business_unit_id: "bu_a".into(),
            status,
            pro_number: "P001".into(),
            bol: String::new(),
            customer_id: "C".into(),
            service_type_id: Some("S".into()),
            shipment_type_id: Some("T".into()),
            tractor_type_id: None,
            trailer_type_id: None,
            owner_id: None,
            freight_charge_amount: None,
            total_charge_amount: None,
            moves: vec![ShipmentMove {
                id: "shp_1_m1".into(),
                sequence: 0,
                stops: vec![
                    stop("s1", "loc1", 0, StopType::Pickup),
                    stop("s2", "loc2", 1, StopType::Delivery),
                ],
            }],
            created_at: now,
            updated_at: now,
        }
    }

    fn lane(auto_assign: bool) -> DedicatedLane {
        let now = Utc::now();
        DedicatedLane {
            id: "dl_1".into(),
            organization_id: "org_a".into(),
            business_unit_id: "bu_a".into(),
            name: "Lane-DAL-to-HOU".into(),
            status: LaneStatus::Active,
            key: LaneKey {
                customer_id: "C".into(),
                origin_location_id: "loc1".into(),
                destination_location_id: "loc2".into(),
                service_type_id: Some("S".into()),
                shipment_type_id: Some("T".into()),
                trailer_type_id: None,
                tractor_type_id: None,
            },
            primary_worker_id: "W1".into(),
            secondary_worker_id: None,
            auto_assign,
            created_at: now,
            updated_at: now,
        }
    }

    fn event(operation: Operation) -> ChangeEvent {
        let row: Value = json!({
            "id": "shp_1",
            "organization_id": "org_a",
            "business_unit_id": "bu_a",
            "status": "New"
        });
        let row = row.as_object().cloned().unwrap();
        ChangeEvent {
            operation,
            table: SHIPMENTS.into(),
            schema: "public".into(),
            before: (operation == Operation::Update).then(|| row.clone()),
            after: Some(row),
            metadata: EventMetadata {
                timestamp: 1_700_000_000_000,
                source: SourceInfo {
                    connector: "postgresql".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_create_assigns_from_matching_lane() {
        let h = harness();
        h.lanes.create(&lane(true)).await.unwrap();
        h.shipments.insert(shipment(ShipmentStatus::New)).await;
        h.assignments
            .register_moves("shp_1", vec!["shp_1_m1".into()])
            .await;

        h.handler.handle_event(&event(Operation::Create)).await.unwrap();

        let requests = h.assignments.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].primary_worker_id, "W1");
        assert_eq!(
            h.shipments.get("shp_1").await.unwrap().status,
            ShipmentStatus::Assigned
        );
    }

    #[tokio::test]
    async fn test_updates_are_ignored() {
        let h = harness();
        h.lanes.create(&lane(true)).await.unwrap();
        h.shipments.insert(shipment(ShipmentStatus::New)).await;

        h.handler.handle_event(&event(Operation::Update)).await.unwrap();

        assert!(h.assignments.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_already_assigned_shipment_is_skipped() {
        let h = harness();
        h.lanes.create(&lane(true)).await.unwrap();
        h.shipments.insert(shipment(ShipmentStatus::Assigned)).await;

        h.handler.handle_event(&event(Operation::Create)).await.unwrap();

        assert!(h.assignments.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_shipment_is_not_an_error() {
        let h = harness();
        h.handler.handle_event(&event(Operation::Create)).await.unwrap();
        assert!(h.assignments.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_assignment_failure_is_handler_error() {
        let h = harness();
        h.lanes.create(&lane(true)).await.unwrap();
        h.shipments.insert(shipment(ShipmentStatus::New)).await;
        h.assignments.set_failing(true);

        let err = h
            .handler
            .handle_event(&event(Operation::Create))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "handler_failed");
        assert_eq!(h.shipments.get("shp_1").await.unwrap().status, ShipmentStatus::New);
    }
}
