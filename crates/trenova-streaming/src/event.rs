// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server-sent event messages.
//!
//! A broadcast payload is encoded to JSON once and the resulting message is
//! shared by every client queue; cloning a [`SseMessage`] only bumps two
//! reference counts.

use std::sync::Arc;

use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

/// Event name used when a payload does not carry an `operation` field.
pub const DEFAULT_EVENT: &str = "new-entry";

/// One encoded SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    event: Arc<str>,
    data: Arc<str>,
}

impl SseMessage {
    /// Build a message from an event name and pre-encoded JSON data.
    pub fn new(event: impl Into<Arc<str>>, data: impl Into<Arc<str>>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// `connected {status, timestamp}` sent right after admission.
    pub fn connected(now: DateTime<Utc>) -> Self {
        Self::new(
            "connected",
            format!(
                r#"{{"status":"connected","timestamp":{}}}"#,
                now.timestamp()
            ),
        )
    }

    /// `ping {timestamp}` heartbeat.
    pub fn ping(now: DateTime<Utc>) -> Self {
        Self::new("ping", format!(r#"{{"timestamp":{}}}"#, now.timestamp()))
    }

    /// Encode a broadcast payload.
    ///
    /// The event name is the payload's string `operation` field, falling back
    /// to [`DEFAULT_EVENT`].
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let event = payload
            .get("operation")
            .and_then(Value::as_str)
            .filter(|op| !op.is_empty() && !op.contains(['\n', '\r']))
            .unwrap_or(DEFAULT_EVENT);
        let data = serde_json::to_string(payload)?;
        Ok(Self::new(event, data))
    }

    /// Event name.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Encoded JSON data.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Wire form: `event: <name>\ndata: <json>\n\n`.
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }

    /// Convert into an axum SSE event.
    pub fn to_event(&self) -> Event {
        Event::default().event(self.event()).data(self.data())
    }
}
