// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trenova Streaming - tenant-scoped server-sent event fan-out
//!
//! Browser clients hold long-lived SSE connections per logical stream
//! (`shipments`, `workers`, …). Change events arriving from the CDC consumer
//! are fanned out to every client of the matching tenant.
//!
//! # Architecture
//!
//! ```text
//!                                 ┌────────────────────────────────────────┐
//!  CDC handler ─ broadcast ─────► │             StreamService              │
//!                                 │  managers: stream_key → StreamManager  │
//!  GET /api/v1/streams/{name} ──► │  user_connections: user → count        │
//!                                 └──────────────┬─────────────────────────┘
//!                                                │
//!                         ┌──────────────────────┼──────────────────────┐
//!                         ▼                      ▼                      ▼
//!              shipments:org_a:bu_a   shipments:org_b:bu_1      workers:org_a:bu_a
//!                 ┌──────────┐            ┌──────────┐            ┌──────────┐
//!                 │ client 1 │◄─ queue    │ client 3 │            │ client 4 │
//!                 │ client 2 │◄─ queue    └──────────┘            └──────────┘
//!                 └──────────┘
//! ```
//!
//! Each client owns a bounded queue (100 messages). A broadcast never waits
//! longer than the send timeout (100ms) for any single client; a client whose
//! queue stays full is marked slow and the message is dropped for it.
//!
//! # Wire format
//!
//! | Event | Data |
//! |-------|------|
//! | `connected` | `{"status":"connected","timestamp":<unix>}` |
//! | `ping` | `{"timestamp":<unix>}` every 30s |
//! | `create` / `update` / `delete` / `new-entry` | broadcast payload |
//!
//! # Modules
//!
//! - [`service`]: Admission, quotas, response loop and the sweeper
//! - [`manager`]: Per-stream client registry and fan-out
//! - [`client`]: One connected client
//! - [`event`]: SSE message encoding
//! - [`http`]: axum router
//! - [`config`]: Limits and timings
//! - [`error`]: Error type

#![deny(missing_docs)]

/// One connected client.
pub mod client;

/// Limits and timings.
pub mod config;

/// Error type and HTTP mapping.
pub mod error;

/// SSE message encoding.
pub mod event;

/// axum router for the SSE endpoint.
pub mod http;

/// Per-stream client registry.
pub mod manager;

/// Stream service.
pub mod service;

pub use client::{SendOutcome, StreamClient};
pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use event::SseMessage;
pub use manager::{BroadcastReport, StreamManager, StreamMetrics};
pub use service::{ActiveStream, Connection, StreamService};
