// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP routes: the SSE endpoint plus health and metrics.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;
use trenova_cdc::{CdcConsumer, CdcMetrics};
use trenova_jobs::{BrokerStats, JobService, JobServiceStats};
use trenova_streaming::{ActiveStream, StreamService};

/// Shared state behind the operational routes.
#[derive(Clone)]
pub struct AppState {
    /// Live stream fan-out.
    pub streaming: Arc<StreamService>,
    /// Background jobs.
    pub jobs: Arc<JobService>,
    /// CDC consumer, when configured.
    pub cdc: Option<Arc<CdcConsumer>>,
    /// When the runtime started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    fn cdc_healthy(&self) -> bool {
        self.cdc.as_ref().is_none_or(|cdc| cdc.is_running())
    }
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: &'static str,
    /// Server uptime in seconds
    pub uptime_secs: i64,
    /// Whether the CDC consumer is running (`None` when not configured)
    pub cdc_running: Option<bool>,
    /// Job service status
    pub jobs: JobServiceStats,
}

/// Metrics response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    /// Server uptime in seconds
    pub uptime_secs: i64,
    /// CDC consumer metrics
    pub cdc: Option<CdcMetrics>,
    /// Streams with connected clients
    pub streams: Vec<ActiveStream>,
    /// Job service status
    pub jobs: JobServiceStats,
    /// Queue depths (`None` when the broker could not be reached)
    pub queues: Option<BrokerStats>,
}

/// Full application router.
pub fn router(state: AppState) -> Router {
    let streams = trenova_streaming::http::router(state.streaming.clone());
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(streams)
        .layer(TraceLayer::new_for_http())
}

/// GET /health
///
/// 200 while the job service is healthy and a configured CDC consumer is
/// running, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let healthy = state.jobs.is_healthy() && state.cdc_healthy();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        uptime_secs: state.uptime_secs(),
        cdc_running: state.cdc.as_ref().map(|cdc| cdc.is_running()),
        jobs: state.jobs.stats().await,
    };
    (code, Json(body))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    let queues = match state.jobs.queue_stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(error = %e, "Failed to read queue stats");
            None
        }
    };
    Json(MetricsResponse {
        uptime_secs: state.uptime_secs(),
        cdc: state.cdc.as_ref().map(|cdc| cdc.metrics()),
        streams: state.streaming.active(),
        jobs: state.jobs.stats().await,
        queues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;
    use trenova_jobs::{InMemoryBroker, JobsConfig};
    use trenova_streaming::StreamConfig;

    fn state() -> AppState {
        let jobs = JobService::new(
            Arc::new(InMemoryBroker::new()),
            JobsConfig {
                scheduler_enabled: false,
                poll_interval: Duration::from_millis(10),
                ..JobsConfig::default()
            },
        );
        AppState {
            streaming: Arc::new(StreamService::new(StreamConfig::default())),
            jobs: Arc::new(jobs),
            cdc: None,
            started_at: Utc::now(),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_degraded_until_jobs_start() {
        let state = state();
        let (status, body) = get_json(router(state.clone()), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert!(body["cdcRunning"].is_null());

        state.jobs.start().await.unwrap();
        let (status, body) = get_json(router(state.clone()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["jobs"]["isRunning"], true);
        state.jobs.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_reports_queues_and_streams() {
        let (status, body) = get_json(router(state()), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["cdc"].is_null());
        assert_eq!(body["streams"], Value::Array(vec![]));
        assert!(body["queues"].is_object());
    }

    #[tokio::test]
    async fn test_stream_route_is_mounted() {
        let response = router(state())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/streams/shipments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
