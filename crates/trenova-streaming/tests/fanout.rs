// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end fan-out through the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;
use trenova_core::TenantScope;
use trenova_core::ports::StreamingService;
use trenova_streaming::http::{BU_HEADER, ORG_HEADER, USER_HEADER, router};
use trenova_streaming::{StreamConfig, StreamService};

fn request(org: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/v1/streams/shipments")
        .header(ORG_HEADER, org)
        .header(BU_HEADER, "bu_a")
        .header(USER_HEADER, user)
        .body(Body::empty())
        .unwrap()
}

async fn next_chunk(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("timed out waiting for frame")
        .expect("body ended")
        .expect("body error");
    String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
}

#[tokio::test]
async fn test_broadcast_reaches_only_matching_tenant() {
    let service = Arc::new(StreamService::new(StreamConfig::default()));

    let a = router(service.clone()).oneshot(request("org_a", "usr_1")).await.unwrap();
    let b = router(service.clone()).oneshot(request("org_b", "usr_2")).await.unwrap();
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);

    let mut body_a = a.into_body();
    let mut body_b = b.into_body();
    assert!(next_chunk(&mut body_a).await.starts_with("event: connected\n"));
    assert!(next_chunk(&mut body_b).await.starts_with("event: connected\n"));

    service
        .broadcast_to_stream(
            "shipments",
            "org_a",
            "bu_a",
            json!({"operation": "create", "shipment": {"id": "shp_1"}}),
        )
        .await
        .unwrap();

    let chunk = next_chunk(&mut body_a).await;
    assert!(chunk.starts_with("event: create\n"));
    assert!(chunk.contains(r#""id":"shp_1""#));

    let nothing = tokio::time::timeout(Duration::from_millis(50), body_b.frame()).await;
    assert!(nothing.is_err());

    let streams = service.active_streams().await;
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].stream_key, "shipments:org_a:bu_a");
    assert_eq!(streams[0].client_count, 1);
}

#[tokio::test]
async fn test_shutdown_ends_open_responses() {
    let service = Arc::new(StreamService::new(StreamConfig::default()));
    service.start().await;

    let response = router(service.clone()).oneshot(request("org_a", "usr_1")).await.unwrap();
    let mut body = response.into_body();
    assert!(next_chunk(&mut body).await.contains("connected"));

    service.shutdown().await.unwrap();
    let end = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_many_clients_per_stream_and_quota_per_user() {
    let service = Arc::new(StreamService::new(StreamConfig {
        max_connections_per_user: 2,
        ..Default::default()
    }));

    let scope = TenantScope::new("org_a", "bu_a", "usr_1");
    let first = service.connect("shipments", scope.clone()).unwrap();
    let second = service.connect("shipments", scope.clone()).unwrap();
    assert!(service.connect("shipments", scope.clone()).is_err());

    let mut streams: Vec<_> = [first, second]
        .into_iter()
        .map(|c| Box::pin(c.into_messages()))
        .collect();
    for stream in &mut streams {
        assert_eq!(stream.next().await.unwrap().event(), "connected");
    }

    service
        .broadcast_to_stream("shipments", "org_a", "bu_a", json!({"id": 1}))
        .await
        .unwrap();
    for stream in &mut streams {
        assert_eq!(stream.next().await.unwrap().event(), "new-entry");
    }

    drop(streams);
    assert!(service.connect("shipments", scope).is_ok());
}
