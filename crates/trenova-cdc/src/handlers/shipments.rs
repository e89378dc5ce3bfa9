// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broadcasts shipment row changes to the `shipments` live stream.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};
use trenova_core::ports::StreamingService;

use crate::error::{CdcError, Result};
use crate::event::{ChangeEvent, Operation, Row};
use crate::handler::CdcEventHandler;

/// Table and stream name.
pub const SHIPMENTS: &str = "shipments";

/// A `shipments` row as captured by Debezium.
///
/// Read from snake_case columns, written camelCase for browser clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct ShipmentRecord {
    /// Shipment ID.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Owning business unit.
    pub business_unit_id: String,
    /// Status.
    #[serde(default)]
    pub status: Option<String>,
    /// PRO number.
    #[serde(default)]
    pub pro_number: Option<String>,
    /// Bill of lading.
    #[serde(default)]
    pub bol: Option<String>,
    /// Customer.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Service type.
    #[serde(default)]
    pub service_type_id: Option<String>,
    /// Shipment type.
    #[serde(default)]
    pub shipment_type_id: Option<String>,
    /// Tractor type.
    #[serde(default)]
    pub tractor_type_id: Option<String>,
    /// Trailer type.
    #[serde(default)]
    pub trailer_type_id: Option<String>,
    /// Owning user.
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Weight.
    #[serde(default)]
    pub weight: Option<Value>,
    /// Piece count.
    #[serde(default)]
    pub pieces: Option<Value>,
    /// Freight charge.
    #[serde(default)]
    pub freight_charge_amount: Option<Value>,
    /// Total charge.
    #[serde(default)]
    pub total_charge_amount: Option<Value>,
    /// Actual ship date (unix seconds).
    #[serde(default)]
    pub actual_ship_date: Option<i64>,
    /// Actual delivery date (unix seconds).
    #[serde(default)]
    pub actual_delivery_date: Option<i64>,
    /// Optimistic-lock version.
    #[serde(default)]
    pub version: Option<i64>,
    /// Created at (unix seconds).
    #[serde(default)]
    pub created_at: Option<i64>,
    /// Updated at (unix seconds).
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl ShipmentRecord {
    /// Parse a captured row.
    pub fn from_row(row: &Row) -> Result<Self> {
        serde_json::from_value(Value::Object(row.clone()))
            .map_err(|e| CdcError::invalid(format!("invalid shipment row: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct Metadata<'a> {
    source: &'a str,
    lsn: Option<i64>,
    transaction_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<bool>,
}

#[derive(Debug, Serialize)]
struct UpsertEnvelope<'a> {
    operation: &'static str,
    timestamp: i64,
    shipment: &'a ShipmentRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed_fields: Option<Vec<String>>,
    metadata: Metadata<'a>,
}

#[derive(Debug, Serialize)]
struct DeleteEnvelope<'a> {
    operation: &'static str,
    timestamp: i64,
    shipment_id: &'a str,
    pro_number: &'a str,
    organization_id: &'a str,
    business_unit_id: &'a str,
    deleted_at: i64,
    metadata: Metadata<'a>,
}

/// Keys of `after` that are missing from `before` or hold a different value.
pub fn changed_fields(before: &Row, after: &Row) -> Vec<String> {
    let mut changed: Vec<String> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    changed.sort();
    changed
}

fn text<'a>(row: &'a Row, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// `shipments` handler publishing to the live stream.
pub struct ShipmentsHandler {
    streaming: Arc<dyn StreamingService>,
}

impl ShipmentsHandler {
    /// Create a handler broadcasting through `streaming`.
    pub fn new(streaming: Arc<dyn StreamingService>) -> Self {
        Self { streaming }
    }

    fn metadata(event: &ChangeEvent, with_snapshot: bool) -> Metadata<'_> {
        Metadata {
            source: &event.metadata.source.connector,
            lsn: event.metadata.lsn,
            transaction_id: event.metadata.transaction_id.as_deref(),
            snapshot: with_snapshot.then_some(event.metadata.source.snapshot),
        }
    }

    async fn broadcast(&self, org_id: &str, bu_id: &str, envelope: Value, id: &str) -> Result<()> {
        self.streaming
            .broadcast_to_stream(SHIPMENTS, org_id, bu_id, envelope)
            .await
            .map_err(|e| {
                error!(shipment_id = %id, org_id = %org_id, bu_id = %bu_id, error = %e, "Failed to broadcast shipment event");
                CdcError::handler(SHIPMENTS, format!("broadcast failed: {e}"))
            })
    }

    async fn handle_upsert(&self, event: &ChangeEvent) -> Result<()> {
        let after = event
            .after
            .as_ref()
            .ok_or_else(|| CdcError::invalid(format!("{} event missing after data", event.operation)))?;
        let shipment = ShipmentRecord::from_row(after)?;

        let changed = match (event.operation, event.before.as_ref()) {
            (Operation::Update, Some(before)) => Some(changed_fields(before, after)),
            (Operation::Update, None) => Some(Vec::new()),
            _ => None,
        };

        let envelope = UpsertEnvelope {
            operation: event.operation.as_str(),
            timestamp: event.metadata.timestamp,
            shipment: &shipment,
            changed_fields: changed.clone(),
            metadata: Self::metadata(event, event.operation == Operation::Create),
        };

        self.broadcast(
            &shipment.organization_id,
            &shipment.business_unit_id,
            serde_json::to_value(&envelope)?,
            &shipment.id,
        )
        .await?;

        info!(
            shipment_id = %shipment.id,
            pro_number = shipment.pro_number.as_deref().unwrap_or_default(),
            org_id = %shipment.organization_id,
            bu_id = %shipment.business_unit_id,
            operation = %event.operation,
            changed_fields = changed.as_ref().map_or(0, Vec::len),
            "Broadcast shipment event"
        );
        Ok(())
    }

    async fn handle_delete(&self, event: &ChangeEvent) -> Result<()> {
        let before = event
            .before
            .as_ref()
            .ok_or_else(|| CdcError::invalid("delete event missing before data"))?;

        let shipment_id = text(before, "id");
        let org_id = text(before, "organization_id");
        let bu_id = text(before, "business_unit_id");
        if shipment_id.is_empty() {
            return Err(CdcError::invalid("delete event missing shipment ID"));
        }
        if org_id.is_empty() || bu_id.is_empty() {
            return Err(CdcError::invalid("delete event missing tenant information"));
        }

        let envelope = DeleteEnvelope {
            operation: Operation::Delete.as_str(),
            timestamp: event.metadata.timestamp,
            shipment_id,
            pro_number: text(before, "pro_number"),
            organization_id: org_id,
            business_unit_id: bu_id,
            deleted_at: Utc::now().timestamp(),
            metadata: Self::metadata(event, false),
        };

        self.broadcast(org_id, bu_id, serde_json::to_value(&envelope)?, shipment_id)
            .await?;
        info!(shipment_id = %shipment_id, org_id = %org_id, bu_id = %bu_id, "Broadcast shipment delete");
        Ok(())
    }
}

#[async_trait]
impl CdcEventHandler for ShipmentsHandler {
    fn table_name(&self) -> &str {
        SHIPMENTS
    }

    async fn handle_event(&self, event: &ChangeEvent) -> Result<()> {
        debug!(operation = %event.operation, table = %event.table, "Processing shipment CDC event");
        match event.operation {
            Operation::Create | Operation::Update => self.handle_upsert(event).await,
            Operation::Delete => self.handle_delete(event).await,
            Operation::Read => {
                debug!("Ignoring snapshot read event");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventMetadata, SourceInfo};
    use serde_json::json;
    use trenova_core::ports::memory::RecordingStreamingService;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn shipment_row(status: &str) -> Row {
        row(json!({
            "id": "shp_1",
            "organization_id": "org_a",
            "business_unit_id": "bu_a",
            "pro_number": "P001",
            "status": status,
            "weight": 1200,
            "updated_at": 1_700_000_000_i64
        }))
    }

    fn event(operation: Operation, before: Option<Row>, after: Option<Row>) -> ChangeEvent {
        ChangeEvent {
            operation,
            table: SHIPMENTS.into(),
            schema: "public".into(),
            before,
            after,
            metadata: EventMetadata {
                timestamp: 1_700_000_000_000,
                source: SourceInfo {
                    connector: "postgresql".into(),
                    table: SHIPMENTS.into(),
                    ..Default::default()
                },
                lsn: Some(99),
                transaction_id: Some("tx-1".into()),
            },
        }
    }

    #[tokio::test]
    async fn test_create_envelope() {
        let streaming = Arc::new(RecordingStreamingService::new());
        let handler = ShipmentsHandler::new(streaming.clone());

        handler
            .handle_event(&event(Operation::Create, None, Some(shipment_row("New"))))
            .await
            .unwrap();

        let sent = streaming.broadcasts().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].stream, "shipments");
        assert_eq!(sent[0].org_id, "org_a");
        assert_eq!(sent[0].bu_id, "bu_a");

        let data = &sent[0].data;
        assert_eq!(data["operation"], "create");
        assert_eq!(data["shipment"]["id"], "shp_1");
        assert_eq!(data["shipment"]["proNumber"], "P001");
        assert_eq!(data["shipment"]["businessUnitId"], "bu_a");
        assert_eq!(data["metadata"]["snapshot"], false);
        assert_eq!(data["metadata"]["source"], "postgresql");
        assert_eq!(data["metadata"]["lsn"], 99);
        assert!(data.get("changed_fields").is_none());
    }

    #[tokio::test]
    async fn test_update_reports_changed_fields() {
        let streaming = Arc::new(RecordingStreamingService::new());
        let handler = ShipmentsHandler::new(streaming.clone());

        let mut after = shipment_row("Assigned");
        after.insert("bol".into(), json!("B-1"));
        handler
            .handle_event(&event(Operation::Update, Some(shipment_row("New")), Some(after)))
            .await
            .unwrap();

        let data = &streaming.broadcasts().await[0].data;
        assert_eq!(data["operation"], "update");
        assert_eq!(data["changed_fields"], json!(["bol", "status"]));
        assert!(data["metadata"].get("snapshot").is_none());
    }

    #[tokio::test]
    async fn test_delete_envelope() {
        let streaming = Arc::new(RecordingStreamingService::new());
        let handler = ShipmentsHandler::new(streaming.clone());

        handler
            .handle_event(&event(Operation::Delete, Some(shipment_row("New")), None))
            .await
            .unwrap();

        let data = &streaming.broadcasts().await[0].data;
        assert_eq!(data["operation"], "delete");
        assert_eq!(data["shipment_id"], "shp_1");
        assert_eq!(data["pro_number"], "P001");
        assert_eq!(data["organization_id"], "org_a");
        assert!(data["deleted_at"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_read_is_ignored() {
        let streaming = Arc::new(RecordingStreamingService::new());
        let handler = ShipmentsHandler::new(streaming.clone());

        handler
            .handle_event(&event(Operation::Read, None, Some(shipment_row("New"))))
            .await
            .unwrap();
        assert!(streaming.broadcasts().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_failure_is_handler_error() {
        let handler = ShipmentsHandler::new(Arc::new(RecordingStreamingService::failing()));
        let err = handler
            .handle_event(&event(Operation::Create, None, Some(shipment_row("New"))))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "handler_failed");
    }

    #[tokio::test]
    async fn test_row_without_tenant_is_invalid() {
        let handler = ShipmentsHandler::new(Arc::new(RecordingStreamingService::new()));
        let err = handler
            .handle_event(&event(Operation::Create, None, Some(row(json!({"id": "shp_1"})))))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_structure");
    }

    #[test]
    fn test_changed_fields() {
        let before = row(json!({"a": 1, "b": 2}));
        let after = row(json!({"a": 1, "b": 3, "c": 4}));
        assert_eq!(changed_fields(&before, &after), vec!["b", "c"]);
    }
}
