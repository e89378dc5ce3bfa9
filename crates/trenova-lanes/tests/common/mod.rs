// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for trenova-lanes integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use trenova_core::TenantScope;
use trenova_core::ports::memory::{
    InMemoryShipmentRepository, RecordingAssignmentRepository, RecordingAuditService,
};
use trenova_core::shipment::{Shipment, ShipmentMove, ShipmentStatus, Stop, StopType};
use trenova_lanes::{
    AssignmentService, DedicatedLane, DedicatedLaneSuggestion, InMemoryDedicatedLaneRepository,
    InMemoryLocationRepository, InMemoryPatternConfigRepository, InMemorySuggestionRepository,
    LaneKey, LaneStatus, Location, PatternService, SuggestionService, SuggestionStatus,
};

pub const ORG: &str = "org_a";
pub const BU: &str = "bu_a";

pub fn scope() -> TenantScope {
    TenantScope::new(ORG, BU, "usr_ops")
}

pub fn key(origin: &str, destination: &str) -> LaneKey {
    LaneKey {
        customer_id: "C".into(),
        origin_location_id: origin.into(),
        destination_location_id: destination.into(),
        service_type_id: Some("S".into()),
        shipment_type_id: Some("T".into()),
        trailer_type_id: Some("TT".into()),
        tractor_type_id: Some("RT".into()),
    }
}

fn stop(id: String, location: &str, sequence: i32, stop_type: StopType) -> Stop {
    Stop {
        id,
        sequence,
        stop_type,
        location_id: location.into(),
        planned_arrival: None,
        planned_departure: None,
        actual_arrival: None,
        actual_departure: None,
    }
}

/// A shipment from `origin` to `destination` for customer `C` with
/// service `S`, shipment type `T`, trailer `TT` and tractor `RT`.
pub fn shipment(
    id: &str,
    origin: &str,
    destination: &str,
    status: ShipmentStatus,
    created_at: DateTime<Utc>,
) -> Shipment {
    Shipment {
        id: id.into(),
        organization_id: ORG.into(),
        business_unit_id: BU.into(),
        status,
        pro_number: format!("PRO-{id}"),
        bol: String::new(),
        customer_id: "C".into(),
        service_type_id: Some("S".into()),
        shipment_type_id: Some("T".into()),
        tractor_type_id: Some("RT".into()),
        trailer_type_id: Some("TT".into()),
        owner_id: None,
        freight_charge_amount: Some(Decimal::from(1000)),
        total_charge_amount: Some(Decimal::from(1100)),
        moves: vec![ShipmentMove {
            id: format!("{id}_m1"),
            sequence: 0,
            stops: vec![
                stop(format!("{id}_s1"), origin, 0, StopType::Pickup),
                stop(format!("{id}_s2"), destination, 1, StopType::Delivery),
            ],
        }],
        created_at,
        updated_at: created_at,
    }
}

pub fn location(id: &str, code: &str) -> Location {
    Location {
        id: id.into(),
        organization_id: ORG.into(),
        business_unit_id: BU.into(),
        code: code.into(),
        name: format!("{code} yard"),
    }
}

pub fn pending_suggestion(id: &str, expires_at: DateTime<Utc>) -> DedicatedLaneSuggestion {
    let now = Utc::now();
    DedicatedLaneSuggestion {
        id: id.into(),
        organization_id: ORG.into(),
        business_unit_id: BU.into(),
        status: SuggestionStatus::Pending,
        key: key("loc1", "loc2"),
        confidence_score: Decimal::new(9, 1),
        frequency: 4,
        avg_freight_charge: Some(Decimal::from(1000)),
        total_freight_value: Some(Decimal::from(4000)),
        first_shipment_date: now - Duration::days(22),
        last_shipment_date: now - Duration::days(1),
        analysis_start_date: now - Duration::days(90),
        analysis_end_date: now,
        suggested_name: "Lane-DAL-to-HOU".into(),
        pattern_details: json!({"shipmentIds": ["s1", "s2", "s3", "s4"]}),
        expires_at,
        processed_by_id: None,
        processed_at: None,
        created_dedicated_lane_id: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn lane(id: &str, key: LaneKey, auto_assign: bool) -> DedicatedLane {
    let now = Utc::now();
    DedicatedLane {
        id: id.into(),
        organization_id: ORG.into(),
        business_unit_id: BU.into(),
        name: "Lane-DAL-to-HOU".into(),
        status: LaneStatus::Active,
        key,
        primary_worker_id: "W1".into(),
        secondary_worker_id: Some("W2".into()),
        auto_assign,
        created_at: now,
        updated_at: now,
    }
}

/// All stores in memory with the three services wired over them.
pub struct Harness {
    pub shipments: Arc<InMemoryShipmentRepository>,
    pub suggestions: Arc<InMemorySuggestionRepository>,
    pub lanes: Arc<InMemoryDedicatedLaneRepository>,
    pub configs: Arc<InMemoryPatternConfigRepository>,
    pub locations: Arc<InMemoryLocationRepository>,
    pub assignments: Arc<RecordingAssignmentRepository>,
    pub audit: Arc<RecordingAuditService>,
    pub patterns: PatternService,
    pub decisions: SuggestionService,
    pub auto: AssignmentService,
}

impl Harness {
    pub async fn new() -> Self {
        let shipments = Arc::new(InMemoryShipmentRepository::new());
        let suggestions = Arc::new(InMemorySuggestionRepository::new());
        let lanes = Arc::new(InMemoryDedicatedLaneRepository::new());
        let configs = Arc::new(InMemoryPatternConfigRepository::new());
        let locations = Arc::new(InMemoryLocationRepository::new());
        let assignments = Arc::new(RecordingAssignmentRepository::new());
        let audit = Arc::new(RecordingAuditService::new());

        locations.insert(location("loc1", "DAL")).await;
        locations.insert(location("loc2", "HOU")).await;

        let patterns = PatternService::new(
            shipments.clone(),
            suggestions.clone(),
            lanes.clone(),
            configs.clone(),
            locations.clone(),
            audit.clone(),
        );
        let decisions = SuggestionService::new(suggestions.clone(), lanes.clone(), audit.clone());
        let auto = AssignmentService::new(lanes.clone(), shipments.clone(), assignments.clone());

        Self {
            shipments,
            suggestions,
            lanes,
            configs,
            locations,
            assignments,
            audit,
            patterns,
            decisions,
            auto,
        }
    }
}

/// Skip the test when no PostgreSQL database is configured.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_TRENOVA_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_TRENOVA_DATABASE_URL not set");
            return;
        }
    };
}
