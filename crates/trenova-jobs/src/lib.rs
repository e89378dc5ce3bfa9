// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trenova Jobs - background job engine
//!
//! Typed payloads are queued on a [`JobBroker`] (Redis in production, in
//! memory for tests), fetched by a weighted pool of workers and dispatched to
//! one [`JobHandler`] per [`JobType`]. A [`CronScheduler`] enqueues the
//! recurring sweeps.
//!
//! # Architecture
//!
//! ```text
//!   JobService::enqueue ──┐         ┌──────────── CronScheduler (tick 1s)
//!                         ▼         ▼
//!                  ┌─────────────────────────┐
//!                  │        JobBroker        │  queue:{q}  scheduled  retry
//!                  └────────────┬────────────┘  archived:{q}  result:{id}
//!                               │ dequeue (weighted queue order)
//!            ┌──────────────────┼──────────────────┐
//!            ▼                  ▼                  ▼
//!       ┌─────────┐        ┌─────────┐        ┌─────────┐
//!       │ worker  │  ...   │ worker  │  ...   │forwarder│ scheduled/retry → queue
//!       └────┬────┘        └────┬────┘        └─────────┘
//!            │ catch_unwind + timeout
//!            ▼
//!     HandlerRegistry ──► JobHandler ──► complete | retry (2ⁿ s, ≤30 s) | archive
//!
//!     Supervisor restarts the whole WorkerServer 5 s after a crash.
//! ```
//!
//! # Queues
//!
//! | Queue | Weight | Used by |
//! |-------|--------|---------|
//! | `critical` | 5 | Status updates |
//! | `email` | 2 | Sends, queue drain |
//! | `shipment` | 1 | Delay sweep, duplication |
//! | `pattern_analysis` | 1 | Lane pattern detection |
//! | `compliance` | 1 | Compliance checks |
//! | `system` | 1 | Suggestion expiry, maintenance |
//! | `default` | 1 | Everything else |
//!
//! Within a queue, tasks run by priority and then in arrival order.
//!
//! # Failure handling
//!
//! | Outcome | Effect |
//! |---------|--------|
//! | Retriable error or panic, retries left | Retried after `min(2ⁿ, 30)` seconds |
//! | Retries exhausted, or non-retriable error | Archived; error handler called |
//! | Deadline passed | Archived without running |
//! | Unique key still held | Enqueue fails with [`JobError::Duplicate`] |
//!
//! # Modules
//!
//! - [`types`]: Job types, queues, priorities and options
//! - [`payload`]: Typed payloads
//! - [`task`]: Task records
//! - [`broker`]: Broker trait, Redis and in-memory backends
//! - [`handler`]: Handler traits and registry
//! - [`handlers`]: Built-in handlers
//! - [`server`]: Worker pool
//! - [`supervisor`]: Restart loop
//! - [`scheduler`]: Recurring entries
//! - [`service`]: Public service API

#![deny(missing_docs)]

/// Broker trait and backends.
pub mod broker;

/// Job service configuration.
pub mod config;

/// Error types.
pub mod error;

/// Handler traits and registry.
pub mod handler;

/// Built-in handlers.
pub mod handlers;

/// Typed payloads.
pub mod payload;

/// Recurring job scheduler.
pub mod scheduler;

/// Worker pool.
pub mod server;

/// Job service.
pub mod service;

/// Restart loop for long-running tasks.
pub mod supervisor;

/// Task records.
pub mod task;

/// Job types, queues and options.
pub mod types;

pub use broker::{
    BrokerStats, InMemoryBroker, JobBroker, LEASE_EXPIRED, LEASE_GRACE, QueueDepth, RedisBroker,
};
pub use config::JobsConfig;
pub use error::{JobError, Result};
pub use handler::{HandlerRegistry, JobHandler, PayloadHandler, Typed, typed};
pub use payload::{JobBasePayload, JobPayload};
pub use scheduler::{CronScheduler, Schedule, ScheduledJob, canonical_schedule};
pub use server::{ErrorHandler, LoggingErrorHandler, ServerConfig, WorkerServer, WorkerStats};
pub use service::{JobService, JobServiceStats};
pub use supervisor::{Supervisor, SupervisorState};
pub use task::{Task, TaskInfo, TaskState};
pub use types::{JobOptions, JobType, Priority, Queue};
