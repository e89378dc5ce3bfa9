// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface: `GET /api/v1/streams/{name}`.
//!
//! Authentication happens upstream; by the time a request reaches this
//! router the gateway has stamped the tenant scope into headers.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Sse};
use axum::routing::get;
use trenova_core::TenantScope;

use crate::error::{Result, StreamError};
use crate::service::StreamService;

/// Organization header.
pub const ORG_HEADER: &str = "x-organization-id";
/// Business unit header.
pub const BU_HEADER: &str = "x-business-unit-id";
/// User header.
pub const USER_HEADER: &str = "x-user-id";

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(StreamError::Unauthorized(name))
}

/// Read the tenant scope from request headers.
pub fn scope_from_headers(headers: &HeaderMap) -> Result<TenantScope> {
    Ok(TenantScope::new(
        header(headers, ORG_HEADER)?,
        header(headers, BU_HEADER)?,
        header(headers, USER_HEADER)?,
    ))
}

/// Router with the SSE endpoint.
pub fn router(service: Arc<StreamService>) -> Router {
    Router::new()
        .route("/api/v1/streams/{name}", get(stream_handler))
        .with_state(service)
}

async fn stream_handler(
    State(service): State<Arc<StreamService>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let scope = scope_from_headers(&headers)?;
    let connection = service.connect(&name, scope)?;

    Ok((
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(connection.into_events()),
    ))
}
