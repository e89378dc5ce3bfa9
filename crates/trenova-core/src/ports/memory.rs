// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory port implementations.
//!
//! Used by tests across the workspace and by the composition root when no
//! database is configured. Recording implementations keep every call so tests
//! can assert on side effects.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::*;
use crate::id::{self, new_id};
use crate::shipment::{Shipment, ShipmentStatus};
use crate::{CoreError, Result, TenantScope};

/// A broadcast captured by [`RecordingStreamingService`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBroadcast {
    /// Logical stream name.
    pub stream: String,
    /// Organization ID.
    pub org_id: String,
    /// Business unit ID.
    pub bu_id: String,
    /// Payload.
    pub data: Value,
}

/// Streaming service that records broadcasts instead of delivering them.
#[derive(Default)]
pub struct RecordingStreamingService {
    broadcasts: Arc<Mutex<Vec<RecordedBroadcast>>>,
    fail: bool,
}

impl RecordingStreamingService {
    /// Create a recording service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service whose broadcasts always fail.
    pub fn failing() -> Self {
        Self {
            broadcasts: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    /// Broadcasts recorded so far.
    pub async fn broadcasts(&self) -> Vec<RecordedBroadcast> {
        self.broadcasts.lock().await.clone()
    }
}

#[async_trait]
impl StreamingService for RecordingStreamingService {
    async fn broadcast_to_stream(
        &self,
        stream: &str,
        org_id: &str,
        bu_id: &str,
        data: Value,
    ) -> Result<()> {
        if self.fail {
            return Err(CoreError::Transient("stream unavailable".to_string()));
        }
        self.broadcasts.lock().await.push(RecordedBroadcast {
            stream: stream.to_string(),
            org_id: org_id.to_string(),
            bu_id: bu_id.to_string(),
            data,
        });
        Ok(())
    }

    async fn active_streams(&self) -> Vec<StreamSummary> {
        Vec::new()
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Audit sink that keeps entries in memory.
#[derive(Default)]
pub struct RecordingAuditService {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
    fail_for: Mutex<Vec<String>>,
}

impl RecordingAuditService {
    /// Create a recording audit sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every entry for `resource_id` fail.
    pub async fn fail_for(&self, resource_id: impl Into<String>) {
        self.fail_for.lock().await.push(resource_id.into());
    }

    /// Entries recorded so far.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditService for RecordingAuditService {
    async fn log_action(&self, entry: AuditEntry) -> Result<()> {
        if self.fail_for.lock().await.contains(&entry.resource_id) {
            return Err(CoreError::database("insert audit entry", "audit store unavailable"));
        }
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

/// Notification sink that keeps notifications in memory.
#[derive(Default)]
pub struct RecordingNotificationService {
    sent: Arc<Mutex<Vec<JobCompletionNotification>>>,
}

impl RecordingNotificationService {
    /// Create a recording notification sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications sent so far.
    pub async fn sent(&self) -> Vec<JobCompletionNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationService for RecordingNotificationService {
    async fn send_job_completion_notification(
        &self,
        notification: JobCompletionNotification,
    ) -> Result<()> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

/// Email service that records messages and drains a counter-based queue.
#[derive(Default)]
pub struct RecordingEmailService {
    plain: Arc<Mutex<Vec<EmailRequest>>>,
    templated: Arc<Mutex<Vec<TemplatedEmailRequest>>>,
    queued: Mutex<usize>,
}

impl RecordingEmailService {
    /// Create a recording email service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `count` emails are waiting in the queue.
    pub async fn enqueue(&self, count: usize) {
        *self.queued.lock().await += count;
    }

    /// Plain emails sent so far.
    pub async fn plain(&self) -> Vec<EmailRequest> {
        self.plain.lock().await.clone()
    }

    /// Templated emails sent so far.
    pub async fn templated(&self) -> Vec<TemplatedEmailRequest> {
        self.templated.lock().await.clone()
    }
}

#[async_trait]
impl EmailService for RecordingEmailService {
    async fn send_email(&self, request: EmailRequest) -> Result<()> {
        if request.to.is_empty() {
            return Err(CoreError::validation("to", "at least one recipient is required"));
        }
        self.plain.lock().await.push(request);
        Ok(())
    }

    async fn send_templated_email(&self, request: TemplatedEmailRequest) -> Result<()> {
        if request.template_id.is_empty() {
            return Err(CoreError::validation("templateId", "template is required"));
        }
        self.templated.lock().await.push(request);
        Ok(())
    }

    async fn process_email_queue(&self) -> Result<QueueReport> {
        let mut queued = self.queued.lock().await;
        let report = QueueReport {
            sent: *queued,
            failed: 0,
        };
        *queued = 0;
        Ok(report)
    }
}

/// Shipment store backed by a map keyed on shipment ID.
#[derive(Default)]
pub struct InMemoryShipmentRepository {
    shipments: Arc<Mutex<HashMap<String, Shipment>>>,
    fail_updates: AtomicBool,
}

impl InMemoryShipmentRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a shipment.
    pub async fn insert(&self, shipment: Shipment) {
        self.shipments
            .lock()
            .await
            .insert(shipment.id.clone(), shipment);
    }

    /// Make `update_status` fail.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of one shipment.
    pub async fn get(&self, id: &str) -> Option<Shipment> {
        self.shipments.lock().await.get(id).cloned()
    }

    /// Number of stored shipments.
    pub async fn len(&self) -> usize {
        self.shipments.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.shipments.lock().await.is_empty()
    }
}

#[async_trait]
impl ShipmentRepository for InMemoryShipmentRepository {
    async fn list_for_pattern_analysis(&self, query: &PatternShipmentQuery) -> Result<Vec<Shipment>> {
        let shipments = self.shipments.lock().await;
        let mut matched: Vec<Shipment> = shipments
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.created_at);
        Ok(matched)
    }

    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<Shipment> {
        self.shipments
            .lock()
            .await
            .get(id)
            .filter(|s| s.organization_id == scope.org_id && s.business_unit_id == scope.bu_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("shipment", id))
    }

    async fn update_status(
        &self,
        scope: &TenantScope,
        id: &str,
        status: ShipmentStatus,
    ) -> Result<Shipment> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(CoreError::database("update shipment status", "store unavailable"));
        }
        let mut shipments = self.shipments.lock().await;
        let shipment = shipments
            .get_mut(id)
            .filter(|s| s.organization_id == scope.org_id && s.business_unit_id == scope.bu_id)
            .ok_or_else(|| CoreError::not_found("shipment", id))?;
        shipment.status = status;
        shipment.updated_at = Utc::now();
        Ok(shipment.clone())
    }

    async fn delay_overdue_shipments(&self, now: DateTime<Utc>) -> Result<Vec<Shipment>> {
        let mut shipments = self.shipments.lock().await;
        let mut delayed = Vec::new();
        for shipment in shipments.values_mut() {
            if shipment.status.can_be_delayed() && shipment.is_overdue(now) {
                shipment.status = ShipmentStatus::Delayed;
                shipment.updated_at = now;
                delayed.push(shipment.clone());
            }
        }
        delayed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(delayed)
    }

    async fn bulk_duplicate(&self, request: &DuplicateRequest) -> Result<Vec<Shipment>> {
        let mut shipments = self.shipments.lock().await;
        let original = shipments
            .get(&request.shipment_id)
            .filter(|s| request.scope.same_tenant(&TenantScope::system(&s.organization_id, &s.business_unit_id)))
            .cloned()
            .ok_or_else(|| CoreError::not_found("shipment", &request.shipment_id))?;

        let now = Utc::now();
        let shift = now - original.created_at;
        let mut copies = Vec::with_capacity(request.count);
        for _ in 0..request.count {
            let mut copy = original.clone();
            copy.id = new_id(id::SHIPMENT);
            copy.status = ShipmentStatus::New;
            copy.created_at = now;
            copy.updated_at = now;
            for mv in &mut copy.moves {
                mv.id = new_id("smv");
                for stop in &mut mv.stops {
                    stop.id = new_id("stp");
                    stop.actual_arrival = None;
                    stop.actual_departure = None;
                    if request.override_dates {
                        stop.planned_arrival = stop.planned_arrival.map(|t| shift_by(t, shift));
                        stop.planned_departure =
                            stop.planned_departure.map(|t| shift_by(t, shift));
                    }
                }
            }
            shipments.insert(copy.id.clone(), copy.clone());
            copies.push(copy);
        }
        Ok(copies)
    }
}

fn shift_by(t: DateTime<Utc>, shift: Duration) -> DateTime<Utc> {
    t.checked_add_signed(shift).unwrap_or(t)
}

/// Assignment store that records every bulk assignment.
#[derive(Default)]
pub struct RecordingAssignmentRepository {
    requests: Arc<Mutex<Vec<AssignmentRequest>>>,
    moves_by_shipment: Mutex<HashMap<String, Vec<String>>>,
    fail: AtomicBool,
}

impl RecordingAssignmentRepository {
    /// Create a recording store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the move IDs of a shipment so assignments can be materialised.
    pub async fn register_moves(&self, shipment_id: impl Into<String>, move_ids: Vec<String>) {
        self.moves_by_shipment
            .lock()
            .await
            .insert(shipment_id.into(), move_ids);
    }

    /// Make `bulk_assign` fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Requests recorded so far.
    pub async fn requests(&self) -> Vec<AssignmentRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl AssignmentRepository for RecordingAssignmentRepository {
    async fn bulk_assign(&self, request: &AssignmentRequest) -> Result<Vec<AssignmentRecord>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::database("bulk assign", "store unavailable"));
        }
        self.requests.lock().await.push(request.clone());
        let moves = self
            .moves_by_shipment
            .lock()
            .await
            .get(&request.shipment_id)
            .cloned()
            .unwrap_or_default();
        Ok(moves
            .into_iter()
            .map(|move_id| AssignmentRecord {
                id: new_id(id::ASSIGNMENT),
                move_id,
                primary_worker_id: request.primary_worker_id.clone(),
                secondary_worker_id: request.secondary_worker_id.clone(),
            })
            .collect())
    }
}
