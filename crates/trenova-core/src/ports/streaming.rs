// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Per-stream figures reported by the stream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    /// Composite stream key.
    pub stream_key: String,
    /// Connected clients.
    pub client_count: usize,
}

/// Fan-out of data updates to connected browser clients.
#[async_trait]
pub trait StreamingService: Send + Sync {
    /// Broadcast `data` to every client of `stream` within one tenant.
    ///
    /// A stream without clients is not an error.
    async fn broadcast_to_stream(
        &self,
        stream: &str,
        org_id: &str,
        bu_id: &str,
        data: Value,
    ) -> Result<()>;

    /// Active streams and their client counts.
    async fn active_streams(&self) -> Vec<StreamSummary>;

    /// Disconnect every client.
    async fn shutdown(&self) -> Result<()>;
}
