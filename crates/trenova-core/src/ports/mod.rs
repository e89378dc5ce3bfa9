// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborator ports.
//!
//! Subsystems depend on these traits rather than on concrete stores or
//! transports. Production adapters are wired in the composition root;
//! [`memory`] holds in-memory implementations for tests and local runs.

mod audit;
mod email;
pub mod memory;
mod notification;
mod shipment;
mod streaming;

pub use audit::{AuditAction, AuditEntry, AuditService};
pub use email::{EmailRequest, EmailService, QueueReport, TemplatedEmailRequest};
pub use notification::{JobCompletionNotification, NotificationService};
pub use shipment::{
    AssignmentRecord, AssignmentRepository, AssignmentRequest, DuplicateRequest,
    PatternShipmentQuery, ShipmentRepository,
};
pub use streaming::{StreamSummary, StreamingService};
