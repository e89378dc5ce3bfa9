// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime start, wiring and shutdown over in-memory backends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use apache_avro::Schema;
use apache_avro::types::Value;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use trenova_cdc::avro::frame_datum;
use trenova_cdc::{CdcConfig, InMemoryPublisher, InMemoryReader, RetryPolicy, StaticSchemaRegistry};
use trenova_core::ports::memory::{
    InMemoryShipmentRepository, RecordingAssignmentRepository, RecordingAuditService,
    RecordingEmailService, RecordingNotificationService,
};
use trenova_core::shipment::{Shipment, ShipmentMove, ShipmentStatus, Stop, StopType};
use trenova_jobs::payload::ProcessEmailQueuePayload;
use trenova_jobs::{InMemoryBroker, JobBasePayload, JobOptions, JobType, JobsConfig};
use trenova_lanes::{
    DedicatedLane, DedicatedLaneRepository, InMemoryDedicatedLaneRepository, LaneKey, LaneStatus,
};
use trenova_server::{CdcSource, Collaborators, Config, LaneStores, ServerRuntime};

const SCHEMA_ID: u32 = 7;
const TOPIC: &str = "trenova.public.shipments";

const ENVELOPE_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Envelope",
    "namespace": "trenova.public.shipments",
    "fields": [
        {"name": "before", "type": ["null", {
            "type": "record",
            "name": "Value",
            "fields": [
                {"name": "id", "type": "string"},
                {"name": "organization_id", "type": "string"},
                {"name": "business_unit_id", "type": "string"},
                {"name": "status", "type": "string"}
            ]
        }], "default": null},
        {"name": "after", "type": ["null", "Value"], "default": null},
        {"name": "source", "type": {
            "type": "record",
            "name": "Source",
            "namespace": "io.debezium.connector.postgresql",
            "fields": [
                {"name": "connector", "type": "string"},
                {"name": "schema", "type": "string"},
                {"name": "table", "type": "string"}
            ]
        }},
        {"name": "op", "type": "string"},
        {"name": "ts_ms", "type": ["null", "long"], "default": null}
    ]
}"#;

fn created_shipment_message() -> Vec<u8> {
    let schema = Schema::parse_str(ENVELOPE_SCHEMA).unwrap();
    let after = Value::Record(vec![
        ("id".into(), Value::String("shp_1".into())),
        ("organization_id".into(), Value::String("org_a".into())),
        ("business_unit_id".into(), Value::String("bu_a".into())),
        ("status".into(), Value::String("New".into())),
    ]);
    let source = Value::Record(vec![
        ("connector".into(), Value::String("postgresql".into())),
        ("schema".into(), Value::String("public".into())),
        ("table".into(), Value::String("shipments".into())),
    ]);
    let envelope = Value::Record(vec![
        ("before".into(), Value::Union(0, Box::new(Value::Null))),
        ("after".into(), Value::Union(1, Box::new(after))),
        ("source".into(), source),
        ("op".into(), Value::String("c".into())),
        ("ts_ms".into(), Value::Union(1, Box::new(Value::Long(1_700_000_000_000)))),
    ]);
    frame_datum(SCHEMA_ID, &schema, envelope).unwrap()
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

fn shipment() -> Shipment {
    let now = Utc::now();
    Shipment {
        id: "shp_1".into(),
        organization_id: "org_a".into(),
        business_unit_id: "bu_a".into(),
        status: ShipmentStatus::New,
        pro_number: "P001".into(),
        bol: String::new(),
        customer_id: "C".into(),
        service_type_id: None,
        shipment_type_id: None,
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

fn lane() -> DedicatedLane {
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
            service_type_id: None,
            shipment_type_id: None,
            trailer_type_id: None,
            tractor_type_id: None,
        },
        primary_worker_id: "W1".into(),
        secondary_worker_id: None,
        auto_assign: true,
        created_at: now,
        updated_at: now,
    }
}

fn config() -> Config {
    Config {
        http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        cdc: CdcConfig {
            worker_count: 1,
            parallel: false,
            shutdown_timeout: Duration::from_secs(2),
            handler_timeout: Duration::from_secs(2),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                factor: 2.0,
            },
            ..CdcConfig::default()
        },
        jobs: JobsConfig {
            scheduler_enabled: false,
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(2),
            ..JobsConfig::default()
        },
        ..Config::default()
    }
}

struct Harness {
    shipments: Arc<InMemoryShipmentRepository>,
    assignments: Arc<RecordingAssignmentRepository>,
    email: Arc<RecordingEmailService>,
    lanes: Arc<InMemoryDedicatedLaneRepository>,
    publisher: InMemoryPublisher,
    runtime: ServerRuntime,
}

async fn start() -> Harness {
    let shipments = Arc::new(InMemoryShipmentRepository::new());
    let assignments = Arc::new(RecordingAssignmentRepository::new());
    let email = Arc::new(RecordingEmailService::new());
    let collaborators = Collaborators {
        shipments: shipments.clone(),
        assignments: assignments.clone(),
        audit: Arc::new(RecordingAuditService::new()),
        notifications: Arc::new(RecordingNotificationService::new()),
        email: email.clone(),
    };

    let lanes = Arc::new(InMemoryDedicatedLaneRepository::new());
    let stores = LaneStores {
        lanes: lanes.clone(),
        ..LaneStores::in_memory()
    };

    let (reader, publisher) = InMemoryReader::new(vec![TOPIC.to_string()]);
    let registry = StaticSchemaRegistry::new();
    registry.register(SCHEMA_ID, ENVELOPE_SCHEMA);

    let runtime = ServerRuntime::builder()
        .config(config())
        .collaborators(collaborators)
        .lane_stores(stores)
        .job_broker(Arc::new(InMemoryBroker::new()))
        .cdc_source(CdcSource {
            reader: Arc::new(reader),
            registry: Arc::new(registry),
        })
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    Harness {
        shipments,
        assignments,
        email,
        lanes,
        publisher,
        runtime,
    }
}

async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_build_requires_config() {
    let err = ServerRuntime::builder().build().unwrap_err();
    assert!(err.to_string().contains("config is required"));
}

#[tokio::test]
async fn test_health_and_metrics_over_http() {
    let h = start().await;
    let addr = h.runtime.local_addr();
    assert_ne!(addr.port(), 0);

    let health = http_get(addr, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"), "{health}");
    assert!(health.contains("\"status\":\"ok\""), "{health}");
    assert!(health.contains("\"cdcRunning\":true"), "{health}");

    let metrics = http_get(addr, "/metrics").await;
    assert!(metrics.starts_with("HTTP/1.1 200"), "{metrics}");
    assert!(metrics.contains("\"handlersRegistered\":1"), "{metrics}");

    let stream = http_get(addr, "/api/v1/streams/shipments").await;
    assert!(stream.starts_with("HTTP/1.1 401"), "{stream}");

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_job_handler_is_registered() {
    let h = start().await;
    let stats = h.runtime.jobs().stats().await;
    assert!(stats.is_running);
    assert_eq!(stats.handler_count, 6);

    h.email.enqueue(3).await;
    let info = h
        .runtime
        .jobs()
        .enqueue(
            JobType::ProcessEmailQueue,
            &ProcessEmailQueuePayload {
                base: JobBasePayload::system(),
            },
            Some(JobOptions::email()),
        )
        .await
        .unwrap();

    let jobs = h.runtime.jobs().clone();
    let done = eventually(Duration::from_secs(5), || {
        let jobs = jobs.clone();
        let id = info.id.clone();
        async move { jobs.job_result(&id).await.unwrap().is_some() }
    })
    .await;
    assert!(done);
    assert_eq!(
        jobs.job_result(&info.id).await.unwrap().as_deref(),
        Some("Processed email queue: 3 sent, 0 failed")
    );

    h.runtime.shutdown().await.unwrap();
    assert!(!jobs.is_running());
}

#[tokio::test]
async fn test_created_shipment_is_auto_assigned() {
    let h = start().await;
    h.lanes.create(&lane()).await.unwrap();
    h.shipments.insert(shipment()).await;
    h.assignments
        .register_moves("shp_1", vec!["shp_1_m1".into()])
        .await;

    assert!(h.publisher.publish(TOPIC, created_shipment_message()));

    let assignments = h.assignments.clone();
    let assigned = eventually(Duration::from_secs(5), || {
        let assignments = assignments.clone();
        async move { assignments.requests().await.len() == 1 }
    })
    .await;
    assert!(assigned);
    assert_eq!(
        h.shipments.get("shp_1").await.unwrap().status,
        ShipmentStatus::Assigned
    );

    let cdc = h.runtime.cdc().unwrap().metrics();
    assert_eq!(cdc.messages_received, 1);
    assert_eq!(cdc.decode_errors, 0);

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_cdc() {
    let h = start().await;
    let cdc = h.runtime.cdc().unwrap().clone();
    assert!(cdc.is_running());

    h.runtime.shutdown().await.unwrap();
    assert!(!cdc.is_running());
}
