// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces for suggestions, lanes, pattern configs and
//! locations.
//!
//! Every method takes the tenant explicitly. [`memory`] holds in-memory
//! implementations; [`postgres`] the `sqlx` backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trenova_core::TenantScope;

use crate::config::PatternConfig;
use crate::error::Result;
use crate::model::{DedicatedLane, DedicatedLaneSuggestion, LaneKey, Location, SuggestionStatus};

pub mod memory;
pub mod postgres;

pub use memory::{
    InMemoryDedicatedLaneRepository, InMemoryLocationRepository, InMemoryPatternConfigRepository,
    InMemorySuggestionRepository,
};
pub use postgres::PostgresLaneStore;

/// Dedicated lane suggestion store.
#[async_trait]
pub trait SuggestionRepository: Send + Sync {
    /// Persist a new suggestion.
    ///
    /// Fails with [`DuplicatePattern`](crate::LaneError::DuplicatePattern)
    /// when a pending suggestion with the same tenant and key exists.
    async fn create(&self, suggestion: &DedicatedLaneSuggestion) -> Result<DedicatedLaneSuggestion>;

    /// Load one suggestion.
    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<DedicatedLaneSuggestion>;

    /// Suggestions of a tenant, newest first, optionally by status.
    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<SuggestionStatus>,
    ) -> Result<Vec<DedicatedLaneSuggestion>>;

    /// Write a decided suggestion.
    ///
    /// Only rows that are still pending are updated, so two concurrent
    /// decisions cannot both win. A row that already left `Pending` yields
    /// [`AlreadyProcessed`](crate::LaneError::AlreadyProcessed).
    async fn update(&self, suggestion: &DedicatedLaneSuggestion) -> Result<DedicatedLaneSuggestion>;

    /// Pending suggestion with the same tenant and full key.
    async fn find_pending_duplicate(
        &self,
        scope: &TenantScope,
        key: &LaneKey,
    ) -> Result<Option<DedicatedLaneSuggestion>>;

    /// Move pending suggestions with `expires_at < now` to `Expired`.
    ///
    /// `None` sweeps every tenant. Returns the number of rows changed.
    async fn expire_old_suggestions(
        &self,
        scope: Option<&TenantScope>,
        now: DateTime<Utc>,
    ) -> Result<u64>;
}

/// Dedicated lane store.
#[async_trait]
pub trait DedicatedLaneRepository: Send + Sync {
    /// Persist a new lane.
    async fn create(&self, lane: &DedicatedLane) -> Result<DedicatedLane>;

    /// Load one lane.
    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<DedicatedLane>;

    /// Lanes of a tenant.
    async fn list(&self, scope: &TenantScope) -> Result<Vec<DedicatedLane>>;

    /// The active lane with the same tenant and full key.
    async fn find_by_key(&self, scope: &TenantScope, key: &LaneKey) -> Result<Option<DedicatedLane>>;
}

/// Per-organization pattern config store.
#[async_trait]
pub trait PatternConfigRepository: Send + Sync {
    /// Every organization's config.
    async fn get_all(&self) -> Result<Vec<PatternConfig>>;

    /// The config of one tenant.
    async fn get_by_org(&self, scope: &TenantScope) -> Result<PatternConfig>;

    /// Insert or replace the config of its tenant.
    async fn upsert(&self, config: &PatternConfig) -> Result<PatternConfig>;
}

/// Location lookup used to name lanes.
#[async_trait]
pub trait LocationRepository: Send + Sync {
    /// Load one location.
    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<Location>;
}
