// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{Result, TenantScope};

/// A plain email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    /// Owning tenant.
    pub scope: TenantScope,
    /// Recipients.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    #[serde(default)]
    pub html_body: String,
    /// Plain text body.
    #[serde(default)]
    pub text_body: String,
}

/// An email rendered from a stored template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatedEmailRequest {
    /// Owning tenant.
    pub scope: TenantScope,
    /// Recipients.
    pub to: Vec<String>,
    /// Template ID.
    pub template_id: String,
    /// Template variables.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

/// Outcome of one queue drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueReport {
    /// Emails sent.
    pub sent: usize,
    /// Emails that failed.
    pub failed: usize,
}

/// Outbound email.
#[async_trait]
pub trait EmailService: Send + Sync {
    /// Send a plain email.
    async fn send_email(&self, request: EmailRequest) -> Result<()>;

    /// Render and send a templated email.
    async fn send_templated_email(&self, request: TemplatedEmailRequest) -> Result<()>;

    /// Drain queued emails.
    async fn process_email_queue(&self) -> Result<QueueReport>;
}
