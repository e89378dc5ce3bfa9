// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trenova CDC - Debezium change events to table handlers
//!
//! Consumes Avro-framed Debezium messages, decodes them against the schema
//! registry, normalizes the envelope into a [`ChangeEvent`] and dispatches it
//! to the handler registered for its table.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐    ┌──────────────┐  bounded   ┌──────────────────────┐
//!  │ MessageReader│───►│ ingest task  │──channel──►│ worker 1..N          │
//!  │ (Kafka, mem) │    │ (serial read)│            │ decode → normalize   │
//!  └──────────────┘    └──────┬───────┘            │ → handler (retry)    │
//!                             │ channel full       └──────────┬───────────┘
//!                             └── process inline ─────────────┤
//!                                                             ▼
//!                         ┌───────────────┐       ┌──────────────────────┐
//!                         │ SchemaCache   │◄──────│ AvroDecoder          │
//!                         │ (LRU)         │ miss  │ 0x00 | id(4) | datum │
//!                         └───────┬───────┘──────►└──────────────────────┘
//!                                 ▼
//!                          Schema registry
//! ```
//!
//! # Error policy
//!
//! | Kind | Example | Handling |
//! |------|---------|----------|
//! | `decode_error` | bad Avro, registry down | recorded, message skipped |
//! | `invalid_structure` | missing `source.table` | recorded, message skipped |
//! | `handler_failed` | broadcast failed | retried with back-off, then skipped |
//! | `panic` | handler panicked | caught, retried like a failure |
//!
//! Frames shorter than five bytes are dropped with a warning.
//!
//! # Modules
//!
//! - [`consumer`]: Lifecycle, ingest loop and worker pool
//! - [`avro`]: Framing, registry clients, schema cache and decoding
//! - [`event`]: Envelope normalization
//! - [`handler`]: Handler trait, registry and fan-out
//! - [`handlers`]: Built-in table handlers
//! - [`reader`]: Broker reader abstraction and topic discovery
//! - [`metrics`]: Counters and snapshots

#![deny(missing_docs)]

/// Framing, registry clients, schema cache and decoding.
pub mod avro;

/// Consumer configuration.
pub mod config;

/// Consumer lifecycle and dispatch.
pub mod consumer;

/// Error types.
pub mod error;

/// Envelope normalization.
pub mod event;

/// Handler trait and registry.
pub mod handler;

/// Built-in table handlers.
pub mod handlers;

/// Kafka reader.
#[cfg(feature = "kafka")]
pub mod kafka;

/// Counters and snapshots.
pub mod metrics;

/// Broker reader abstraction.
pub mod reader;

pub use avro::{AvroDecoder, HttpSchemaRegistry, SchemaCache, SchemaRegistry, StaticSchemaRegistry};
pub use config::{CdcConfig, RetryPolicy, StartOffset};
pub use consumer::CdcConsumer;
pub use error::{CdcError, Result};
pub use event::{ChangeEvent, EventMetadata, Operation, SourceInfo};
pub use handler::{CdcEventHandler, FanoutHandler, HandlerRegistry};
pub use handlers::ShipmentsHandler;
pub use metrics::CdcMetrics;
pub use reader::{BrokerMessage, InMemoryPublisher, InMemoryReader, MessageReader, ReadError};
