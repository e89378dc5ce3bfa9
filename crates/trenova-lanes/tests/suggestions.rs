// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Accept, reject and expiry of suggestions.

mod common;

use chrono::{Duration, Utc};
use common::{Harness, key, pending_suggestion, scope};
use trenova_core::ports::AuditAction;
use trenova_lanes::{
    AcceptSuggestionRequest, DedicatedLaneRepository, LaneError, LaneStatus,
    RejectSuggestionRequest, SuggestionStatus,
};

fn accept_request(id: &str) -> AcceptSuggestionRequest {
    AcceptSuggestionRequest {
        scope: scope(),
        suggestion_id: id.into(),
        dedicated_lane_name: None,
        primary_worker_id: "W1".into(),
        secondary_worker_id: Some("W2".into()),
        auto_assign: true,
    }
}

fn reject_request(id: &str, reason: Option<&str>) -> RejectSuggestionRequest {
    RejectSuggestionRequest {
        scope: scope(),
        suggestion_id: id.into(),
        reason: reason.map(String::from),
    }
}

#[tokio::test]
async fn test_accept_creates_lane_with_suggestion_key() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() + Duration::days(5)))
        .await;

    let lane = h.decisions.accept(&accept_request("sug_1")).await.unwrap();

    assert_eq!(lane.key, key("loc1", "loc2"));
    assert_eq!(lane.name, "Lane-DAL-to-HOU");
    assert_eq!(lane.status, LaneStatus::Active);
    assert_eq!(lane.primary_worker_id, "W1");
    assert_eq!(lane.secondary_worker_id.as_deref(), Some("W2"));
    assert!(lane.auto_assign);
    assert!(lane.id.starts_with("dl_"));

    let stored = h.lanes.get_by_id(&scope(), &lane.id).await.unwrap();
    assert_eq!(stored, lane);

    let suggestion = h.suggestions.get("sug_1").await.unwrap();
    assert_eq!(suggestion.status, SuggestionStatus::Accepted);
    assert_eq!(suggestion.processed_by_id.as_deref(), Some("usr_ops"));
    assert!(suggestion.processed_at.is_some());
    assert_eq!(suggestion.created_dedicated_lane_id.as_deref(), Some(lane.id.as_str()));

    let actions: Vec<AuditAction> = h.audit.entries().await.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Approve, AuditAction::Create]);
}

#[tokio::test]
async fn test_accept_uses_requested_name() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() + Duration::days(5)))
        .await;
    let mut request = accept_request("sug_1");
    request.dedicated_lane_name = Some("Dallas shuttle".into());

    let lane = h.decisions.accept(&request).await.unwrap();
    assert_eq!(lane.name, "Dallas shuttle");

    let mut request = accept_request("sug_1");
    request.dedicated_lane_name = Some(String::new());
    let err = h.decisions.accept(&request).await.unwrap_err();
    assert!(matches!(
        err,
        LaneError::AlreadyProcessed {
            status: SuggestionStatus::Accepted,
            ..
        }
    ));
}

#[tokio::test]
async fn test_accept_expired_suggestion_fails() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() - Duration::seconds(1)))
        .await;

    let err = h.decisions.accept(&accept_request("sug_1")).await.unwrap_err();
    assert!(matches!(err, LaneError::Expired(ref id) if id == "sug_1"));
    assert!(h.lanes.is_empty().await);
}

#[tokio::test]
async fn test_accept_from_other_tenant_is_not_found() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() + Duration::days(5)))
        .await;
    let mut request = accept_request("sug_1");
    request.scope = trenova_core::TenantScope::new("org_b", "bu_b", "usr_x");

    let err = h.decisions.accept(&request).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(h.lanes.is_empty().await);
}

#[tokio::test]
async fn test_accept_survives_failed_status_update() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() + Duration::days(5)))
        .await;
    h.suggestions.fail_updates(true);

    let lane = h.decisions.accept(&accept_request("sug_1")).await.unwrap();

    assert_eq!(h.lanes.len().await, 1);
    let suggestion = h.suggestions.get("sug_1").await.unwrap();
    assert_eq!(suggestion.status, SuggestionStatus::Pending);
    let entries = h.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].resource_id, lane.id);
}

#[tokio::test]
async fn test_accept_survives_audit_failure() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() + Duration::days(5)))
        .await;
    h.audit.fail_for("sug_1").await;

    h.decisions.accept(&accept_request("sug_1")).await.unwrap();
    assert_eq!(
        h.suggestions.get("sug_1").await.unwrap().status,
        SuggestionStatus::Accepted
    );
}

#[tokio::test]
async fn test_reject_records_reason() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() + Duration::days(5)))
        .await;

    let rejected = h
        .decisions
        .reject(&reject_request("sug_1", Some("Customer is seasonal")))
        .await
        .unwrap();

    assert_eq!(rejected.status, SuggestionStatus::Rejected);
    assert_eq!(rejected.processed_by_id.as_deref(), Some("usr_ops"));
    assert_eq!(rejected.pattern_details["rejectReason"], "Customer is seasonal");
    assert!(rejected.pattern_details["rejectedAt"].is_i64());
    assert_eq!(rejected.pattern_details["shipmentIds"].as_array().map(Vec::len), Some(4));

    let entries = h.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Reject);

    let err = h
        .decisions
        .reject(&reject_request("sug_1", None))
        .await
        .unwrap_err();
    assert!(matches!(err, LaneError::AlreadyProcessed { .. }));
}

#[tokio::test]
async fn test_reject_without_reason_keeps_details() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() + Duration::days(5)))
        .await;

    let rejected = h
        .decisions
        .reject(&reject_request("sug_1", Some("")))
        .await
        .unwrap();
    assert!(rejected.pattern_details.get("rejectReason").is_none());
}

#[tokio::test]
async fn test_reject_propagates_store_failure() {
    let h = Harness::new().await;
    h.suggestions
        .insert(pending_suggestion("sug_1", Utc::now() + Duration::days(5)))
        .await;
    h.suggestions.fail_updates(true);

    let err = h
        .decisions
        .reject(&reject_request("sug_1", None))
        .await
        .unwrap_err();
    assert!(err.kind().is_retriable());
    assert!(h.audit.entries().await.is_empty());
}

#[tokio::test]
async fn test_expiry_sweep_only_touches_pending() {
    let h = Harness::new().await;
    let now = Utc::now();
    h.suggestions
        .insert(pending_suggestion("sug_pending", now - Duration::seconds(1)))
        .await;
    let mut accepted = pending_suggestion("sug_accepted", now - Duration::seconds(1));
    accepted.status = SuggestionStatus::Accepted;
    accepted.key = key("loc3", "loc4");
    h.suggestions.insert(accepted).await;
    h.suggestions
        .insert({
            let mut fresh = pending_suggestion("sug_fresh", now + Duration::days(1));
            fresh.key = key("loc5", "loc6");
            fresh
        })
        .await;

    let expired = h.decisions.expire_old_suggestions(None, now).await.unwrap();

    assert_eq!(expired, 1);
    assert_eq!(
        h.suggestions.get("sug_pending").await.unwrap().status,
        SuggestionStatus::Expired
    );
    assert_eq!(
        h.suggestions.get("sug_accepted").await.unwrap().status,
        SuggestionStatus::Accepted
    );
    assert_eq!(
        h.suggestions.get("sug_fresh").await.unwrap().status,
        SuggestionStatus::Pending
    );

    let err = h
        .decisions
        .accept(&accept_request("sug_pending"))
        .await
        .unwrap_err();
    assert!(matches!(err, LaneError::Expired(_)));
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let h = Harness::new().await;
    let now = Utc::now();
    h.suggestions
        .insert(pending_suggestion("sug_1", now + Duration::days(1)))
        .await;
    let mut rejected = pending_suggestion("sug_2", now + Duration::days(1));
    rejected.status = SuggestionStatus::Rejected;
    h.suggestions.insert(rejected).await;

    let pending = h
        .decisions
        .list(&scope(), Some(SuggestionStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "sug_1");
    assert_eq!(h.decisions.list(&scope(), None).await.unwrap().len(), 2);
    assert_eq!(h.decisions.get(&scope(), "sug_2").await.unwrap().status, SuggestionStatus::Rejected);
}
