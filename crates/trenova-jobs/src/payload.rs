// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed job payloads.
//!
//! Every payload flattens [`JobBasePayload`]. A payload without tenant ids is
//! a system-wide job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use trenova_core::TenantScope;
use trenova_core::id::{self, new_id};
use trenova_core::ports::{EmailRequest, TemplatedEmailRequest};

use crate::types::JobType;

/// Fields shared by every payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBasePayload {
    /// Job ID (`job_…`).
    pub job_id: String,
    /// Owning organization, absent for system-wide jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Owning business unit, absent for system-wide jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_unit_id: Option<String>,
    /// User who requested the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Unix seconds when the payload was built.
    pub timestamp: i64,
    /// Free-form caller metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl JobBasePayload {
    /// A system-wide payload with a fresh id and timestamp.
    pub fn system() -> Self {
        Self {
            job_id: new_id(id::JOB),
            timestamp: Utc::now().timestamp(),
            ..Self::default()
        }
    }

    /// A tenant payload with a fresh id and timestamp.
    pub fn for_tenant(scope: &TenantScope) -> Self {
        Self {
            organization_id: Some(scope.org_id.clone()),
            business_unit_id: Some(scope.bu_id.clone()),
            user_id: (!scope.user_id.is_empty()).then(|| scope.user_id.clone()),
            ..Self::system()
        }
    }

    /// Replace the id and timestamp.
    pub fn restamp(&mut self) {
        self.job_id = new_id(id::JOB);
        self.timestamp = Utc::now().timestamp();
    }

    /// Tenant scope when both ids are present.
    pub fn scope(&self) -> Option<TenantScope> {
        match (&self.organization_id, &self.business_unit_id) {
            (Some(org), Some(bu)) if !org.is_empty() && !bu.is_empty() => Some(TenantScope::new(
                org.clone(),
                bu.clone(),
                self.user_id.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

/// Gives schedule helpers access to the shared fields.
pub trait JobPayload: Serialize {
    /// Shared fields.
    fn base(&self) -> &JobBasePayload;
    /// Shared fields, mutably.
    fn base_mut(&mut self) -> &mut JobBasePayload;
}

macro_rules! impl_job_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl JobPayload for $ty {
                fn base(&self) -> &JobBasePayload {
                    &self.base
                }

                fn base_mut(&mut self) -> &mut JobBasePayload {
                    &mut self.base
                }
            }
        )*
    };
}

impl JobPayload for JobBasePayload {
    fn base(&self) -> &JobBasePayload {
        self
    }

    fn base_mut(&mut self) -> &mut JobBasePayload {
        self
    }
}

/// `pattern:analyze`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysisPayload {
    /// Shared fields.
    #[serde(flatten)]
    pub base: JobBasePayload,
    /// Override the minimum frequency for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_frequency: Option<i64>,
    /// Restrict to one customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Window start (unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    /// Window end (unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<i64>,
    /// Why the run was requested (`scheduled`, `manual`).
    #[serde(default)]
    pub trigger_reason: String,
}

/// `pattern:expire_suggestions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireSuggestionsPayload {
    /// Shared fields.
    #[serde(flatten)]
    pub base: JobBasePayload,
    /// Rows per sweep, reported in logs.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    100
}

/// `shipment:delay`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayShipmentPayload {
    /// Shared fields.
    #[serde(flatten)]
    pub base: JobBasePayload,
}

/// `shipment:duplicate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateShipmentPayload {
    /// Shared fields.
    #[serde(flatten)]
    pub base: JobBasePayload,
    /// Shipment to copy.
    pub shipment_id: String,
    /// Number of copies.
    pub count: usize,
    /// Shift stop dates forward.
    #[serde(default)]
    pub override_dates: bool,
    /// Copy commodities.
    #[serde(default)]
    pub include_commodities: bool,
    /// Copy additional charges.
    #[serde(default)]
    pub include_additional_charges: bool,
}

/// Which email API `email:send` calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    /// Plain subject and body.
    #[default]
    Regular,
    /// Rendered from a stored template.
    Templated,
}

/// `email:send`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailPayload {
    /// Shared fields.
    #[serde(flatten)]
    pub base: JobBasePayload,
    /// Which request is set.
    pub email_type: EmailType,
    /// Plain email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<EmailRequest>,
    /// Templated email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templated_request: Option<TemplatedEmailRequest>,
}

/// `email:process_queue`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEmailQueuePayload {
    /// Shared fields.
    #[serde(flatten)]
    pub base: JobBasePayload,
}

/// `shipment:status_update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentStatusUpdatePayload {
    /// Shared fields.
    #[serde(flatten)]
    pub base: JobBasePayload,
    /// Shipment that changed.
    pub shipment_id: String,
    /// Status before.
    pub old_status: String,
    /// Status after.
    pub new_status: String,
}

/// `compliance:check`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceCheckPayload {
    /// Shared fields.
    #[serde(flatten)]
    pub base: JobBasePayload,
    /// Check to run.
    pub check_type: String,
    /// Worker under review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Shipment under review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<String>,
}

impl_job_payload!(
    PatternAnalysisPayload,
    ExpireSuggestionsPayload,
    DelayShipmentPayload,
    DuplicateShipmentPayload,
    SendEmailPayload,
    ProcessEmailQueuePayload,
    ShipmentStatusUpdatePayload,
    ComplianceCheckPayload,
);

/// Short description of a payload for logs.
///
/// Keeps tenant ids and the handful of fields that identify the work, never
/// email bodies or template variables.
pub fn summarize(job_type: JobType, payload: &Value) -> Value {
    let mut summary = Map::new();
    summary.insert("type".into(), json!(job_type.as_str()));
    for key in [
        "jobId",
        "organizationId",
        "businessUnitId",
        "triggerReason",
        "minFrequency",
        "batchSize",
        "shipmentId",
        "count",
        "emailType",
        "checkType",
        "workerId",
    ] {
        if let Some(value) = payload.get(key) {
            summary.insert(key.into(), value.clone());
        }
    }
    if let (Some(old), Some(new)) = (
        payload.get("oldStatus").and_then(Value::as_str),
        payload.get("newStatus").and_then(Value::as_str),
    ) {
        summary.insert("statusChange".into(), json!(format!("{old} -> {new}")));
    }
    let request = payload
        .get("request")
        .or_else(|| payload.get("templatedRequest"));
    if let Some(request) = request {
        if let Some(subject) = request.get("subject") {
            summary.insert("subject".into(), subject.clone());
        }
        if let Some(template) = request.get("templateId") {
            summary.insert("templateId".into(), template.clone());
        }
        if let Some(to) = request.get("to").and_then(Value::as_array) {
            summary.insert("toCount".into(), json!(to.len()));
        }
    }
    Value::Object(summary)
}
