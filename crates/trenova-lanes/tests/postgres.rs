// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store against a live database.
//!
//! Runs only when `TEST_TRENOVA_DATABASE_URL` is set. Every test works in a
//! fresh organization so runs do not interfere.

mod common;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use trenova_core::TenantScope;
use trenova_core::id::new_id;
use trenova_lanes::{
    DedicatedLaneRepository, DedicatedLaneSuggestion, LaneError, LaneStatus, LocationRepository,
    PatternConfig, PatternConfigRepository, PatternDetectionConfig, PostgresLaneStore,
    SuggestionRepository, SuggestionStatus,
};

async fn store() -> Option<PostgresLaneStore> {
    let url = std::env::var("TEST_TRENOVA_DATABASE_URL").ok()?;
    let store = match PostgresLaneStore::connect(&url).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Skipping test: failed to connect: {e}");
            return None;
        }
    };
    store.migrate().await.expect("Failed to run migrations");
    Some(store)
}

fn tenant() -> TenantScope {
    TenantScope::new(new_id("org"), new_id("bu"), "usr_ops")
}

fn suggestion_for(scope: &TenantScope, expires_in: Duration) -> DedicatedLaneSuggestion {
    let mut s = common::pending_suggestion(&new_id("sug"), Utc::now() + expires_in);
    s.organization_id = scope.org_id.clone();
    s.business_unit_id = scope.bu_id.clone();
    s
}

#[tokio::test]
async fn test_suggestion_roundtrip_and_pending_uniqueness() {
    skip_if_no_db!();
    let Some(store) = store().await else { return };
    let scope = tenant();

    let created = SuggestionRepository::create(&store, &suggestion_for(&scope, Duration::days(30)))
        .await
        .unwrap();
    let loaded = SuggestionRepository::get_by_id(&store, &scope, &created.id)
        .await
        .unwrap();
    assert_eq!(loaded.key, created.key);
    assert_eq!(loaded.status, SuggestionStatus::Pending);
    assert_eq!(loaded.confidence_score, Decimal::new(9, 1));
    assert_eq!(loaded.pattern_details["shipmentIds"].as_array().map(Vec::len), Some(4));

    let err = SuggestionRepository::create(&store, &suggestion_for(&scope, Duration::days(30)))
        .await
        .unwrap_err();
    assert!(matches!(err, LaneError::DuplicatePattern(_)), "{err}");

    let found = store
        .find_pending_duplicate(&scope, &created.key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, created.id);

    let mut other_key = created.key.clone();
    other_key.trailer_type_id = None;
    assert!(store
        .find_pending_duplicate(&scope, &other_key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_update_is_pending_only() {
    skip_if_no_db!();
    let Some(store) = store().await else { return };
    let scope = tenant();

    let mut s = SuggestionRepository::create(&store, &suggestion_for(&scope, Duration::days(30)))
        .await
        .unwrap();
    s.status = SuggestionStatus::Rejected;
    s.processed_by_id = Some("usr_ops".into());
    s.processed_at = Some(Utc::now());
    let updated = store.update(&s).await.unwrap();
    assert_eq!(updated.status, SuggestionStatus::Rejected);

    s.status = SuggestionStatus::Accepted;
    let err = store.update(&s).await.unwrap_err();
    assert!(matches!(
        err,
        LaneError::AlreadyProcessed {
            status: SuggestionStatus::Rejected,
            ..
        }
    ));

    let listed = SuggestionRepository::list(&store, &scope, Some(SuggestionStatus::Rejected))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_expiry_sweep_is_tenant_scoped() {
    skip_if_no_db!();
    let Some(store) = store().await else { return };
    let scope = tenant();
    let other = tenant();

    let stale = SuggestionRepository::create(&store, &suggestion_for(&scope, Duration::seconds(-5)))
        .await
        .unwrap();
    SuggestionRepository::create(&store, &suggestion_for(&other, Duration::seconds(-5)))
        .await
        .unwrap();

    let expired = store
        .expire_old_suggestions(Some(&scope), Utc::now())
        .await
        .unwrap();
    assert_eq!(expired, 1);
    let loaded = SuggestionRepository::get_by_id(&store, &scope, &stale.id)
        .await
        .unwrap();
    assert_eq!(loaded.status, SuggestionStatus::Expired);

    let pending = SuggestionRepository::list(&store, &other, Some(SuggestionStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_lane_lookup_is_null_aware() {
    skip_if_no_db!();
    let Some(store) = store().await else { return };
    let scope = tenant();

    let mut lane = common::lane(&new_id("dl"), common::key("loc1", "loc2"), true);
    lane.organization_id = scope.org_id.clone();
    lane.business_unit_id = scope.bu_id.clone();
    lane.key.tractor_type_id = None;
    DedicatedLaneRepository::create(&store, &lane).await.unwrap();

    let found = store.find_by_key(&scope, &lane.key).await.unwrap().unwrap();
    assert_eq!(found.id, lane.id);
    assert_eq!(found.status, LaneStatus::Active);

    let mut with_tractor = lane.key.clone();
    with_tractor.tractor_type_id = Some("RT".into());
    assert!(store.find_by_key(&scope, &with_tractor).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pattern_config_upsert_and_locations() {
    skip_if_no_db!();
    let Some(store) = store().await else { return };
    let scope = tenant();

    let config = PatternConfig::new(new_id("pc"), &scope, PatternDetectionConfig::standard());
    store.upsert(&config).await.unwrap();
    let mut changed = config.clone();
    changed.detection = PatternDetectionConfig::conservative();
    changed.enabled = false;
    store.upsert(&changed).await.unwrap();

    let loaded = store.get_by_org(&scope).await.unwrap();
    assert!(!loaded.enabled);
    assert_eq!(loaded.detection, PatternDetectionConfig::conservative());

    let mut location = common::location("loc1", "DAL");
    location.organization_id = scope.org_id.clone();
    location.business_unit_id = scope.bu_id.clone();
    store.upsert_location(&location).await.unwrap();
    let loaded = LocationRepository::get_by_id(&store, &scope, "loc1")
        .await
        .unwrap();
    assert_eq!(loaded.code, "DAL");
    assert!(LocationRepository::get_by_id(&store, &scope, "loc9")
        .await
        .unwrap_err()
        .is_not_found());
}
