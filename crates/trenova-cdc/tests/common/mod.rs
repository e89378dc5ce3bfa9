// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for trenova-cdc integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use apache_avro::Schema;
use apache_avro::types::Value;
use trenova_cdc::avro::frame_datum;
use trenova_cdc::{CdcConfig, CdcConsumer, CdcMetrics, InMemoryPublisher, InMemoryReader, RetryPolicy, StaticSchemaRegistry};

pub const SCHEMA_ID: u32 = 11;
pub const TOPIC: &str = "trenova.public.shipments";

/// Debezium envelope for the `shipments` table.
pub const ENVELOPE_SCHEMA: &str = r#"{
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
                {"name": "pro_number", "type": ["null", "string"], "default": null},
                {"name": "status", "type": "string"}
            ]
        }], "default": null},
        {"name": "after", "type": ["null", "Value"], "default": null},
        {"name": "source", "type": {
            "type": "record",
            "name": "Source",
            "namespace": "io.debezium.connector.postgresql",
            "fields": [
                {"name": "version", "type": "string"},
                {"name": "connector", "type": "string"},
                {"name": "db", "type": "string"},
                {"name": "schema", "type": "string"},
                {"name": "table", "type": "string"},
                {"name": "snapshot", "type": ["null", "string"], "default": null},
                {"name": "lsn", "type": ["null", "long"], "default": null}
            ]
        }},
        {"name": "op", "type": "string"},
        {"name": "ts_ms", "type": ["null", "long"], "default": null},
        {"name": "transaction", "type": ["null", {
            "type": "record",
            "name": "block",
            "namespace": "event",
            "fields": [
                {"name": "id", "type": "string"},
                {"name": "total_order", "type": "long"},
                {"name": "data_collection_order", "type": "long"}
            ]
        }], "default": null}
    ]
}"#;

fn null() -> Value {
    Value::Union(0, Box::new(Value::Null))
}

fn some(value: Value) -> Value {
    Value::Union(1, Box::new(value))
}

/// One captured shipment row.
pub struct Row {
    pub id: &'static str,
    pub org: &'static str,
    pub bu: &'static str,
    pub pro: Option<&'static str>,
    pub status: &'static str,
}

impl Row {
    pub fn new(id: &'static str, pro: &'static str) -> Self {
        Self {
            id,
            org: "org_a",
            bu: "bu_a",
            pro: Some(pro),
            status: "New",
        }
    }

    fn to_avro(&self) -> Value {
        Value::Record(vec![
            ("id".into(), Value::String(self.id.into())),
            ("organization_id".into(), Value::String(self.org.into())),
            ("business_unit_id".into(), Value::String(self.bu.into())),
            (
                "pro_number".into(),
                self.pro.map_or_else(null, |p| some(Value::String(p.into()))),
            ),
            ("status".into(), Value::String(self.status.into())),
        ])
    }
}

/// Encode a framed envelope for `table`.
pub fn envelope(op: &str, table: &str, before: Option<&Row>, after: Option<&Row>) -> Vec<u8> {
    let schema = Schema::parse_str(ENVELOPE_SCHEMA).expect("envelope schema should parse");
    let source = Value::Record(vec![
        ("version".into(), Value::String("2.5.0.Final".into())),
        ("connector".into(), Value::String("postgresql".into())),
        ("db".into(), Value::String("trenova".into())),
        ("schema".into(), Value::String("public".into())),
        ("table".into(), Value::String(table.into())),
        (
            "snapshot".into(),
            some(Value::String(if op == "r" { "true" } else { "false" }.into())),
        ),
        ("lsn".into(), some(Value::Long(4242))),
    ]);
    let transaction = Value::Record(vec![
        ("id".into(), Value::String("771:4242".into())),
        ("total_order".into(), Value::Long(1)),
        ("data_collection_order".into(), Value::Long(1)),
    ]);
    let value = Value::Record(vec![
        ("before".into(), before.map_or_else(null, |r| some(r.to_avro()))),
        ("after".into(), after.map_or_else(null, |r| some(r.to_avro()))),
        ("source".into(), source),
        ("op".into(), Value::String(op.into())),
        ("ts_ms".into(), some(Value::Long(1_700_000_000_000))),
        ("transaction".into(), some(transaction)),
    ]);
    frame_datum(SCHEMA_ID, &schema, value).expect("envelope should encode")
}

/// Fast-retry configuration with `workers` parallel workers.
pub fn config(workers: usize) -> CdcConfig {
    CdcConfig {
        worker_count: workers,
        parallel: workers > 0,
        shutdown_timeout: Duration::from_secs(5),
        handler_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            factor: 2.0,
        },
        ..Default::default()
    }
}

/// A consumer over an in-memory reader that lists the shipments topic.
pub fn consumer(config: CdcConfig) -> (CdcConsumer, InMemoryPublisher) {
    let (reader, publisher) = InMemoryReader::new(vec![TOPIC.to_string()]);
    let registry = Arc::new(StaticSchemaRegistry::new());
    registry.register(SCHEMA_ID, ENVELOPE_SCHEMA);
    (CdcConsumer::new(config, Arc::new(reader), registry), publisher)
}

/// Poll the consumer's metrics until `done` holds or two seconds pass.
pub async fn wait_for(consumer: &CdcConsumer, done: impl Fn(&CdcMetrics) -> bool) -> CdcMetrics {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let metrics = consumer.metrics();
        if done(&metrics) || tokio::time::Instant::now() >= deadline {
            return metrics;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
