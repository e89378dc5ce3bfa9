// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trenova Lanes - dedicated lane detection, suggestions and auto-assignment
//!
//! Historical shipments are grouped by route and equipment. Recurring groups
//! become pending [`DedicatedLaneSuggestion`]s; an operator accepts one into a
//! [`DedicatedLane`] with a worker pair, after which new shipments on that
//! route can be assigned to those workers automatically.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────┐  completed/billed  ┌───────────────┐
//!  │ Shipment store │───────────────────►│ PatternService│── group → score → filter
//!  └────────────────┘                    └───────┬───────┘        → exclude
//!          ▲                                     │ create
//!          │ Assigned                            ▼
//!  ┌───────┴───────────┐  find_by_key   ┌────────────────────┐
//!  │ AssignmentService │◄───────────────│ Suggestions (Pending)
//!  └───────────────────┘                └───────┬────────────┘
//!          ▲                                    │ accept / reject / expire
//!          │                                    ▼
//!          │                            ┌────────────────────┐
//!          └────────────────────────────│ SuggestionService  │──► DedicatedLane
//!                                       └────────────────────┘
//! ```
//!
//! # Suggestion lifecycle
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | `Pending` | `Accepted` | [`SuggestionService::accept`] |
//! | `Pending` | `Rejected` | [`SuggestionService::reject`] |
//! | `Pending` | `Expired` | [`SuggestionService::expire_old_suggestions`] |
//!
//! At most one pending suggestion exists per tenant and lane key.
//!
//! # Modules
//!
//! - [`config`]: Detection thresholds and per-organization configs
//! - [`detection`]: Pure grouping and confidence scoring
//! - [`pattern`]: Analysis runs and suggestion creation
//! - [`suggestion`]: Accept, reject and expiry
//! - [`assignment`]: Auto-assignment from dedicated lanes
//! - [`repository`]: Store traits, in-memory and PostgreSQL implementations

#![deny(missing_docs)]

/// Auto-assignment from dedicated lanes.
pub mod assignment;

/// Detection thresholds and per-organization configs.
pub mod config;

/// Grouping and confidence scoring.
pub mod detection;

/// Error types.
pub mod error;

/// Suggestion, lane and pattern types.
pub mod model;

/// Analysis runs.
pub mod pattern;

/// Store traits and implementations.
pub mod repository;

/// Operator decisions on suggestions.
pub mod suggestion;

pub use assignment::{AssignmentService, AutoAssignment};
pub use config::{PatternConfig, PatternDetectionConfig};
pub use error::{LaneError, Result};
pub use model::{
    AcceptSuggestionRequest, DedicatedLane, DedicatedLaneSuggestion, LaneKey, LaneStatus, Location,
    PatternAnalysisRequest, PatternAnalysisResult, PatternMatch, RejectSuggestionRequest,
    SuggestionStatus,
};
pub use pattern::PatternService;
pub use repository::{
    DedicatedLaneRepository, InMemoryDedicatedLaneRepository, InMemoryLocationRepository,
    InMemoryPatternConfigRepository, InMemorySuggestionRepository, LocationRepository,
    PatternConfigRepository, PostgresLaneStore, SuggestionRepository,
};
pub use suggestion::SuggestionService;
