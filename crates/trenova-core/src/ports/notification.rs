// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, TenantScope};

/// Notification sent to a user when a background job finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletionNotification {
    /// Tenant and recipient user.
    pub scope: TenantScope,
    /// Job ID.
    pub job_id: String,
    /// Job type name (e.g. "shipment:delay").
    pub job_type: String,
    /// Whether the job succeeded.
    pub success: bool,
    /// Summary message.
    pub message: String,
    /// Structured result.
    pub result: Option<Value>,
}

/// User notification delivery.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Notify a user that a job finished.
    async fn send_job_completion_notification(
        &self,
        notification: JobCompletionNotification,
    ) -> Result<()>;
}
