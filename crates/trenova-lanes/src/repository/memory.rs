// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory stores.
//!
//! Semantics match the PostgreSQL store: tenant-scoped reads, NULL-aware key
//! matching, pending-only updates and one pending suggestion per key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use trenova_core::TenantScope;

use super::{DedicatedLaneRepository, LocationRepository, PatternConfigRepository, SuggestionRepository};
use crate::config::PatternConfig;
use crate::error::{LaneError, Result};
use crate::model::{
    DedicatedLane, DedicatedLaneSuggestion, LaneKey, LaneStatus, Location, SuggestionStatus,
};

fn owned_by(org_id: &str, bu_id: &str, scope: &TenantScope) -> bool {
    org_id == scope.org_id && bu_id == scope.bu_id
}

fn unavailable(operation: &str) -> LaneError {
    LaneError::Core(trenova_core::CoreError::database(operation, "store unavailable"))
}

/// Suggestion store backed by a map keyed on suggestion ID.
#[derive(Default)]
pub struct InMemorySuggestionRepository {
    rows: RwLock<HashMap<String, DedicatedLaneSuggestion>>,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
}

impl InMemorySuggestionRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row as-is, bypassing duplicate checks.
    pub async fn insert(&self, suggestion: DedicatedLaneSuggestion) {
        self.rows
            .write()
            .await
            .insert(suggestion.id.clone(), suggestion);
    }

    /// Make `create` fail.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Make `update` fail.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of one row regardless of tenant.
    pub async fn get(&self, id: &str) -> Option<DedicatedLaneSuggestion> {
        self.rows.read().await.get(id).cloned()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SuggestionRepository for InMemorySuggestionRepository {
    async fn create(&self, suggestion: &DedicatedLaneSuggestion) -> Result<DedicatedLaneSuggestion> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(unavailable("create suggestion"));
        }
        let mut rows = self.rows.write().await;
        let duplicate = suggestion.status == SuggestionStatus::Pending
            && rows.values().any(|row| {
                row.status == SuggestionStatus::Pending
                    && row.organization_id == suggestion.organization_id
                    && row.business_unit_id == suggestion.business_unit_id
                    && row.key == suggestion.key
            });
        if duplicate {
            return Err(LaneError::DuplicatePattern(suggestion.key.to_string()));
        }
        rows.insert(suggestion.id.clone(), suggestion.clone());
        Ok(suggestion.clone())
    }

    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<DedicatedLaneSuggestion> {
        self.rows
            .read()
            .await
            .get(id)
            .filter(|s| owned_by(&s.organization_id, &s.business_unit_id, scope))
            .cloned()
            .ok_or_else(|| LaneError::not_found("suggestion", id))
    }

    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<SuggestionStatus>,
    ) -> Result<Vec<DedicatedLaneSuggestion>> {
        let mut found: Vec<DedicatedLaneSuggestion> = self
            .rows
            .read()
            .await
            .values()
            .filter(|s| owned_by(&s.organization_id, &s.business_unit_id, scope))
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn update(&self, suggestion: &DedicatedLaneSuggestion) -> Result<DedicatedLaneSuggestion> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(unavailable("update suggestion"));
        }
        let mut rows = self.rows.write().await;
        let current = rows
            .get_mut(&suggestion.id)
            .filter(|s| owned_by(&s.organization_id, &s.business_unit_id, &suggestion.scope()))
            .ok_or_else(|| LaneError::not_found("suggestion", &suggestion.id))?;
        if current.status != SuggestionStatus::Pending {
            return Err(LaneError::AlreadyProcessed {
                id: suggestion.id.clone(),
                status: current.status,
            });
        }
        *current = suggestion.clone();
        current.updated_at = Utc::now();
        Ok(current.clone())
    }

    async fn find_pending_duplicate(
        &self,
        scope: &TenantScope,
        key: &LaneKey,
    ) -> Result<Option<DedicatedLaneSuggestion>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|s| {
                s.status == SuggestionStatus::Pending
                    && owned_by(&s.organization_id, &s.business_unit_id, scope)
                    && s.key == *key
            })
            .cloned())
    }

    async fn expire_old_suggestions(
        &self,
        scope: Option<&TenantScope>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut expired = 0;
        for row in rows.values_mut() {
            let in_scope =
                scope.is_none_or(|s| owned_by(&row.organization_id, &row.business_unit_id, s));
            if in_scope && row.status == SuggestionStatus::Pending && row.expires_at < now {
                row.status = SuggestionStatus::Expired;
                row.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

/// Dedicated lane store backed by a map keyed on lane ID.
#[derive(Default)]
pub struct InMemoryDedicatedLaneRepository {
    rows: RwLock<HashMap<String, DedicatedLane>>,
    fail_lookups: AtomicBool,
}

impl InMemoryDedicatedLaneRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `find_by_key` fail.
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Number of stored lanes.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl DedicatedLaneRepository for InMemoryDedicatedLaneRepository {
    async fn create(&self, lane: &DedicatedLane) -> Result<DedicatedLane> {
        self.rows
            .write()
            .await
            .insert(lane.id.clone(), lane.clone());
        Ok(lane.clone())
    }

    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<DedicatedLane> {
        self.rows
            .read()
            .await
            .get(id)
            .filter(|l| owned_by(&l.organization_id, &l.business_unit_id, scope))
            .cloned()
            .ok_or_else(|| LaneError::not_found("dedicated lane", id))
    }

    async fn list(&self, scope: &TenantScope) -> Result<Vec<DedicatedLane>> {
        let mut lanes: Vec<DedicatedLane> = self
            .rows
            .read()
            .await
            .values()
            .filter(|l| owned_by(&l.organization_id, &l.business_unit_id, scope))
            .cloned()
            .collect();
        lanes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(lanes)
    }

    async fn find_by_key(&self, scope: &TenantScope, key: &LaneKey) -> Result<Option<DedicatedLane>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(unavailable("find dedicated lane"));
        }
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|l| {
                l.status == LaneStatus::Active
                    && owned_by(&l.organization_id, &l.business_unit_id, scope)
                    && l.key == *key
            })
            .cloned())
    }
}

/// Pattern config store keyed on tenant.
#[derive(Default)]
pub struct InMemoryPatternConfigRepository {
    rows: RwLock<HashMap<(String, String), PatternConfig>>,
}

impl InMemoryPatternConfigRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternConfigRepository for InMemoryPatternConfigRepository {
    async fn get_all(&self) -> Result<Vec<PatternConfig>> {
        let mut configs: Vec<PatternConfig> = self.rows.read().await.values().cloned().collect();
        configs.sort_by(|a, b| {
            (&a.organization_id, &a.business_unit_id).cmp(&(&b.organization_id, &b.business_unit_id))
        });
        Ok(configs)
    }

    async fn get_by_org(&self, scope: &TenantScope) -> Result<PatternConfig> {
        self.rows
            .read()
            .await
            .get(&(scope.org_id.clone(), scope.bu_id.clone()))
            .cloned()
            .ok_or_else(|| LaneError::not_found("pattern config", scope.to_string()))
    }

    async fn upsert(&self, config: &PatternConfig) -> Result<PatternConfig> {
        let mut stored = config.clone();
        stored.updated_at = Utc::now();
        self.rows.write().await.insert(
            (config.organization_id.clone(), config.business_unit_id.clone()),
            stored.clone(),
        );
        Ok(stored)
    }
}

/// Location store keyed on location ID.
#[derive(Default)]
pub struct InMemoryLocationRepository {
    rows: RwLock<HashMap<String, Location>>,
}

impl InMemoryLocationRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a location.
    pub async fn insert(&self, location: Location) {
        self.rows
            .write()
            .await
            .insert(location.id.clone(), location);
    }
}

#[async_trait]
impl LocationRepository for InMemoryLocationRepository {
    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<Location> {
        self.rows
            .read()
            .await
            .get(id)
            .filter(|l| owned_by(&l.organization_id, &l.business_unit_id, scope))
            .cloned()
            .ok_or_else(|| LaneError::not_found("location", id))
    }
}
