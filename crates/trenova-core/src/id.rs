// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prefixed opaque identifiers.

use uuid::Uuid;

/// Shipment prefix.
pub const SHIPMENT: &str = "shp";
/// Dedicated lane suggestion prefix.
pub const SUGGESTION: &str = "sug";
/// Dedicated lane prefix.
pub const DEDICATED_LANE: &str = "dl";
/// Assignment prefix.
pub const ASSIGNMENT: &str = "a";
/// Background job prefix.
pub const JOB: &str = "job";
/// Stream client prefix.
pub const STREAM_CLIENT: &str = "sc";

/// Generate a new identifier of the form `{prefix}_{32 hex chars}`.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Return the prefix of an identifier, if it has one.
pub fn prefix_of(id: &str) -> Option<&str> {
    id.split_once('_').map(|(prefix, _)| prefix)
}
