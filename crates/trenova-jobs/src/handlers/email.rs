// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use trenova_core::ports::EmailService;

use crate::error::{JobError, Result};
use crate::handler::PayloadHandler;
use crate::payload::{EmailType, ProcessEmailQueuePayload, SendEmailPayload};
use crate::task::Task;
use crate::types::JobType;

/// Sends one email, plain or templated.
pub struct SendEmailHandler {
    email: Arc<dyn EmailService>,
}

impl SendEmailHandler {
    /// Create the handler.
    pub fn new(email: Arc<dyn EmailService>) -> Self {
        Self { email }
    }
}

#[async_trait]
impl PayloadHandler for SendEmailHandler {
    type Payload = SendEmailPayload;
    const JOB_TYPE: JobType = JobType::SendEmail;

    async fn handle(&self, payload: Self::Payload, task: &Task) -> Result<String> {
        match payload.email_type {
            EmailType::Regular => {
                let request = payload.request.ok_or_else(|| {
                    JobError::invalid_payload(Self::JOB_TYPE, "regular email without request")
                })?;
                let recipients = request.to.len();
                self.email.send_email(request).await?;
                debug!(job_id = %task.job_id(), recipients, "Sent email");
                Ok(format!("Sent email to {recipients} recipients"))
            }
            EmailType::Templated => {
                let request = payload.templated_request.ok_or_else(|| {
                    JobError::invalid_payload(
                        Self::JOB_TYPE,
                        "templated email without templatedRequest",
                    )
                })?;
                let recipients = request.to.len();
                let template = request.template_id.clone();
                self.email.send_templated_email(request).await?;
                debug!(job_id = %task.job_id(), recipients, template_id = %template, "Sent templated email");
                Ok(format!("Sent templated email {template} to {recipients} recipients"))
            }
        }
    }
}

/// Drains the outbound email queue.
pub struct ProcessEmailQueueHandler {
    email: Arc<dyn EmailService>,
}

impl ProcessEmailQueueHandler {
    /// Create the handler.
    pub fn new(email: Arc<dyn EmailService>) -> Self {
        Self { email }
    }
}

#[async_trait]
impl PayloadHandler for ProcessEmailQueueHandler {
    type Payload = ProcessEmailQueuePayload;
    const JOB_TYPE: JobType = JobType::ProcessEmailQueue;

    async fn handle(&self, _payload: Self::Payload, task: &Task) -> Result<String> {
        let report = self.email.process_email_queue().await?;
        if report.sent > 0 || report.failed > 0 {
            info!(
                job_id = %task.job_id(),
                sent = report.sent,
                failed = report.failed,
                "Processed email queue"
            );
        }
        Ok(format!(
            "Processed email queue: {} sent, {} failed",
            report.sent, report.failed
        ))
    }
}
