// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant scope.
//!
//! Every query, broadcast and job carries the owning organization and business
//! unit explicitly. The acting user is carried alongside for auditing and
//! per-user quotas.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Organization, business unit and acting user for one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantScope {
    /// Organization ID.
    pub org_id: String,
    /// Business unit ID.
    pub bu_id: String,
    /// Acting user ID (empty for system actions).
    #[serde(default)]
    pub user_id: String,
}

impl TenantScope {
    /// Create a scope for a user acting inside a tenant.
    pub fn new(
        org_id: impl Into<String>,
        bu_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            bu_id: bu_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Create a scope for system actions (no acting user).
    pub fn system(org_id: impl Into<String>, bu_id: impl Into<String>) -> Self {
        Self::new(org_id, bu_id, "")
    }

    /// Same tenant acting as a different user.
    pub fn with_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            org_id: self.org_id.clone(),
            bu_id: self.bu_id.clone(),
            user_id: user_id.into(),
        }
    }

    /// Whether two scopes address the same tenant, ignoring the user.
    pub fn same_tenant(&self, other: &TenantScope) -> bool {
        self.org_id == other.org_id && self.bu_id == other.bu_id
    }

    /// Build the composite stream key `"{logical}:{org}:{bu}"`.
    pub fn stream_key(&self, logical_name: &str) -> String {
        stream_key(logical_name, &self.org_id, &self.bu_id)
    }

    /// Whether both tenant identifiers are present.
    pub fn is_complete(&self) -> bool {
        !self.org_id.is_empty() && !self.bu_id.is_empty()
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.org_id, self.bu_id)
    }
}

/// Build the composite stream key `"{logical}:{org}:{bu}"`.
pub fn stream_key(logical_name: &str, org_id: &str, bu_id: &str) -> String {
    format!("{}:{}:{}", logical_name, org_id, bu_id)
}
