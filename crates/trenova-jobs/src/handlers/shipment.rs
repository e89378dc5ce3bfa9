// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use trenova_core::TenantScope;
use trenova_core::ports::{
    AuditAction, AuditEntry, AuditService, DuplicateRequest, JobCompletionNotification,
    NotificationService, ShipmentRepository,
};
use trenova_core::shipment::Shipment;

use crate::error::{JobError, Result};
use crate::handler::PayloadHandler;
use crate::payload::{DelayShipmentPayload, DuplicateShipmentPayload};
use crate::task::Task;
use crate::types::JobType;

const SHIPMENT_RESOURCE: &str = "shipment";

async fn audit_shipment(
    audit: &dyn AuditService,
    scope: TenantScope,
    shipment: &Shipment,
    action: AuditAction,
    comment: &str,
) {
    let mut entry = AuditEntry::new(scope, SHIPMENT_RESOURCE, &shipment.id, action, comment);
    if let Ok(state) = serde_json::to_value(shipment) {
        entry = entry.with_current(state);
    }
    if let Err(e) = audit.log_action(entry).await {
        warn!(shipment_id = %shipment.id, error = %e, "Failed to write shipment audit entry");
    }
}

/// Marks overdue in-flight shipments as Delayed across all tenants.
///
/// Owners are notified once per tenant with the list of their shipments.
/// Audit failures are logged and do not stop the batch.
pub struct DelayShipmentHandler {
    shipments: Arc<dyn ShipmentRepository>,
    notifications: Arc<dyn NotificationService>,
    audit: Arc<dyn AuditService>,
}

impl DelayShipmentHandler {
    /// Create the handler.
    pub fn new(
        shipments: Arc<dyn ShipmentRepository>,
        notifications: Arc<dyn NotificationService>,
        audit: Arc<dyn AuditService>,
    ) -> Self {
        Self {
            shipments,
            notifications,
            audit,
        }
    }
}

#[async_trait]
impl PayloadHandler for DelayShipmentHandler {
    type Payload = DelayShipmentPayload;
    const JOB_TYPE: JobType = JobType::DelayShipment;

    async fn handle(&self, _payload: Self::Payload, task: &Task) -> Result<String> {
        let delayed = self.shipments.delay_overdue_shipments(Utc::now()).await?;
        if delayed.is_empty() {
            return Ok("No shipments to delay".into());
        }

        let mut by_owner: BTreeMap<(String, String, String), Vec<&Shipment>> = BTreeMap::new();
        for shipment in &delayed {
            let scope =
                TenantScope::system(&shipment.organization_id, &shipment.business_unit_id);
            audit_shipment(
                self.audit.as_ref(),
                scope,
                shipment,
                AuditAction::Update,
                "Shipment marked as delayed",
            )
            .await;

            if let Some(owner) = &shipment.owner_id {
                by_owner
                    .entry((
                        shipment.organization_id.clone(),
                        shipment.business_unit_id.clone(),
                        owner.clone(),
                    ))
                    .or_default()
                    .push(shipment);
            }
        }

        for ((org, bu, owner), shipments) in by_owner {
            let pro_numbers: Vec<&str> = shipments.iter().map(|s| s.pro_number.as_str()).collect();
            let notification = JobCompletionNotification {
                scope: TenantScope::new(org, bu, owner.clone()),
                job_id: task.job_id().to_string(),
                job_type: JobType::DelayShipment.as_str().to_string(),
                success: true,
                message: format!("{} of your shipments were marked as delayed", shipments.len()),
                result: Some(json!({
                    "shipmentIds": shipments.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                    "proNumbers": pro_numbers,
                })),
            };
            if let Err(e) = self
                .notifications
                .send_job_completion_notification(notification)
                .await
            {
                warn!(owner_id = %owner, error = %e, "Failed to notify owner of delayed shipments");
            }
        }

        info!(job_id = %task.job_id(), delayed = delayed.len(), "Delayed overdue shipments");
        Ok(format!("Delayed {} shipments", delayed.len()))
    }
}

/// Creates copies of a shipment for the requesting tenant.
pub struct DuplicateShipmentHandler {
    shipments: Arc<dyn ShipmentRepository>,
    audit: Arc<dyn AuditService>,
    notifications: Arc<dyn NotificationService>,
}

impl DuplicateShipmentHandler {
    /// Create the handler.
    pub fn new(
        shipments: Arc<dyn ShipmentRepository>,
        audit: Arc<dyn AuditService>,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            shipments,
            audit,
            notifications,
        }
    }
}

#[async_trait]
impl PayloadHandler for DuplicateShipmentHandler {
    type Payload = DuplicateShipmentPayload;
    const JOB_TYPE: JobType = JobType::DuplicateShipment;

    async fn handle(&self, payload: Self::Payload, task: &Task) -> Result<String> {
        let scope = payload.base.scope().ok_or_else(|| {
            JobError::invalid_payload(
                Self::JOB_TYPE,
                "organizationId and businessUnitId are required",
            )
        })?;
        if payload.shipment_id.is_empty() {
            return Err(JobError::invalid_payload(Self::JOB_TYPE, "shipmentId is required"));
        }
        if payload.count == 0 {
            return Err(JobError::invalid_payload(Self::JOB_TYPE, "count must be at least 1"));
        }

        let request = DuplicateRequest {
            scope: scope.clone(),
            shipment_id: payload.shipment_id.clone(),
            count: payload.count,
            override_dates: payload.override_dates,
            include_commodities: payload.include_commodities,
            include_additional_charges: payload.include_additional_charges,
        };
        let copies = self.shipments.bulk_duplicate(&request).await?;

        for copy in &copies {
            let comment = format!("Shipment duplicated from {}", payload.shipment_id);
            audit_shipment(self.audit.as_ref(), scope.clone(), copy, AuditAction::Create, &comment)
                .await;
        }

        if !scope.user_id.is_empty() {
            let notification = JobCompletionNotification {
                scope: scope.clone(),
                job_id: task.job_id().to_string(),
                job_type: Self::JOB_TYPE.as_str().to_string(),
                success: true,
                message: format!("Created {} copies of the shipment", copies.len()),
                result: Some(json!({
                    "originalShipmentId": payload.shipment_id,
                    "shipmentIds": copies.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                })),
            };
            if let Err(e) = self
                .notifications
                .send_job_completion_notification(notification)
                .await
            {
                warn!(user_id = %scope.user_id, error = %e, "Failed to notify duplicate requester");
            }
        }

        info!(
            job_id = %task.job_id(),
            shipment_id = %payload.shipment_id,
            copies = copies.len(),
            "Duplicated shipment"
        );
        Ok(format!("Duplicated shipment {} {} times", payload.shipment_id, copies.len()))
    }
}
