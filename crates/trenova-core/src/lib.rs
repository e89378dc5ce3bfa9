// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trenova Core - shared domain model and collaborator ports
//!
//! Every subsystem of the TMS backend (CDC consumer, stream service, job engine,
//! pattern detection, lane assignment) depends on this crate for the handful of
//! types that cross subsystem boundaries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ trenova-cdc  │   │  streaming   │   │ trenova-jobs │   │trenova-lanes │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │                  │                  │                  │
//!        └──────────────────┴────────┬─────────┴──────────────────┘
//!                                    ▼
//!                     ┌─────────────────────────────┐
//!                     │        trenova-core         │
//!                     │  TenantScope · Shipment     │
//!                     │  ports (traits) · CoreError │
//!                     └─────────────────────────────┘
//! ```
//!
//! # Ports
//!
//! Implementations of these traits live outside the core (in the composition
//! root, the stream service, or in-memory test doubles in [`ports::memory`]).
//!
//! | Port | Consumed by |
//! |------|-------------|
//! | [`StreamingService`](ports::StreamingService) | CDC table handlers |
//! | [`AuditService`](ports::AuditService) | Jobs, lanes |
//! | [`NotificationService`](ports::NotificationService) | Job handlers |
//! | [`EmailService`](ports::EmailService) | Email job handlers |
//! | [`ShipmentRepository`](ports::ShipmentRepository) | Jobs, pattern detection |
//! | [`AssignmentRepository`](ports::AssignmentRepository) | Lane auto-assignment |
//!
//! # Modules
//!
//! - [`config`]: Environment variable parsing and `ConfigError`
//! - [`error`]: Core error type and the cross-crate error taxonomy
//! - [`id`]: Prefixed opaque identifiers
//! - [`ports`]: Collaborator interfaces and in-memory implementations
//! - [`shipment`]: Shipment, move and stop domain model
//! - [`tenant`]: Explicit tenant scope

#![deny(missing_docs)]

/// Environment configuration helpers.
pub mod config;

/// Core error type and error taxonomy.
pub mod error;

/// Prefixed opaque identifiers (`shp_…`, `sug_…`).
pub mod id;

/// Interfaces consumed from external collaborators.
pub mod ports;

/// Shipment domain model.
pub mod shipment;

/// Explicit tenant scope passed through call sites.
pub mod tenant;

pub use config::ConfigError;
pub use error::{CoreError, ErrorKind, Result};
pub use tenant::TenantScope;
