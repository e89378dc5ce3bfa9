// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, TenantScope};

/// What happened to the audited resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Resource created.
    Create,
    /// Resource updated.
    Update,
    /// Resource deleted.
    Delete,
    /// Recommendation accepted.
    Approve,
    /// Recommendation rejected.
    Reject,
    /// Worker assigned.
    Assign,
}

/// One audit log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Tenant and acting user. An empty user means a system action.
    pub scope: TenantScope,
    /// Resource type (e.g. "shipment", "dedicated_lane_suggestion").
    pub resource: String,
    /// Resource ID.
    pub resource_id: String,
    /// Action taken.
    pub action: AuditAction,
    /// Human-readable comment.
    pub comment: String,
    /// Resource state before the action.
    pub previous_state: Option<Value>,
    /// Resource state after the action.
    pub current_state: Option<Value>,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        scope: TenantScope,
        resource: impl Into<String>,
        resource_id: impl Into<String>,
        action: AuditAction,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            resource: resource.into(),
            resource_id: resource_id.into(),
            action,
            comment: comment.into(),
            previous_state: None,
            current_state: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the state before the action.
    pub fn with_previous(mut self, state: Value) -> Self {
        self.previous_state = Some(state);
        self
    }

    /// Attach the state after the action.
    pub fn with_current(mut self, state: Value) -> Self {
        self.current_state = Some(state);
        self
    }
}

/// Audit trail sink.
#[async_trait]
pub trait AuditService: Send + Sync {
    /// Record one action.
    async fn log_action(&self, entry: AuditEntry) -> Result<()>;
}
