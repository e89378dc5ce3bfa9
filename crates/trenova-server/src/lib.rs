// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trenova Server - composition root
//!
//! Wires the workspace crates into one process:
//!
//! ```text
//!   broker ──► CdcConsumer ──► FanoutHandler("shipments")
//!                                 ├─► ShipmentsHandler ──► StreamService ──► SSE clients
//!                                 └─► AutoAssignHandler ──► AssignmentService
//!
//!   JobService (Redis) ──► pattern analysis, suggestion expiry, delay sweep,
//!                          duplication, email
//!
//!   axum: GET /api/v1/streams/{name}   GET /health   GET /metrics
//! ```
//!
//! # Lifecycle
//!
//! | Step | Start | Shutdown |
//! |------|-------|----------|
//! | 1 | Bind HTTP listener | Stop accepting connections |
//! | 2 | Stream sweeper | Stop CDC consumer |
//! | 3 | Job workers and scheduler | Close stream clients |
//! | 4 | CDC consumer | Drain HTTP, stop jobs |
//!
//! # Modules
//!
//! - [`config`]: Environment configuration
//! - [`runtime`]: Builder, start and shutdown
//! - [`api`]: HTTP routes
//! - [`assign`]: CDC hook for lane auto-assignment

#![deny(missing_docs)]

/// HTTP routes.
pub mod api;

/// Auto-assignment on shipment inserts.
pub mod assign;

/// Configuration loading.
pub mod config;

/// Embeddable runtime.
pub mod runtime;

pub use config::{Config, ConfigError, LogFormat};
pub use runtime::{CdcSource, Collaborators, LaneStores, ServerRuntime};
