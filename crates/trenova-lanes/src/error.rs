// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for trenova-lanes.

use trenova_core::{CoreError, ErrorKind};

use crate::model::SuggestionStatus;

/// Result type using LaneError.
pub type Result<T> = std::result::Result<T, LaneError>;

/// Errors raised by pattern detection, suggestion handling and lane stores.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LaneError {
    /// Pattern detection configuration is out of range.
    #[error("Invalid pattern configuration '{field}': {message}")]
    InvalidConfig {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// A suggestion, lane, location or config does not exist for the tenant.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Entity type (e.g. "suggestion").
        entity: &'static str,
        /// Entity ID.
        id: String,
    },

    /// Accept attempted after the suggestion's expiry.
    #[error("Suggestion '{0}' has expired")]
    Expired(String),

    /// Accept or reject attempted on a suggestion that is no longer pending.
    #[error("Suggestion '{id}' was already processed ({status})")]
    AlreadyProcessed {
        /// Suggestion ID.
        id: String,
        /// Current status.
        status: SuggestionStatus,
    },

    /// A pending suggestion with the same tenant and key already exists.
    #[error("A pending suggestion already exists for {0}")]
    DuplicatePattern(String),

    /// Collaborator (shipment store, assignment store) failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// PostgreSQL query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded schema could not be applied.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON (pattern details) could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored row holds a value the model does not know.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl LaneError {
    /// Convenience constructor for [`LaneError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Convenience constructor for [`LaneError::InvalidConfig`].
    pub fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }

    /// Whether this is a not-found error (from this crate or a collaborator).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Core(e) => e.is_not_found(),
            Self::Database(sqlx::Error::RowNotFound) => true,
            _ => false,
        }
    }

    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig { .. } => ErrorKind::ValidationError,
            Self::NotFound { .. }
            | Self::Expired(_)
            | Self::AlreadyProcessed { .. }
            | Self::DuplicatePattern(_) => ErrorKind::BusinessError,
            Self::Core(e) => e.kind(),
            Self::Database(_) | Self::Migration(_) => ErrorKind::TransientIo,
            Self::Json(_) | Self::CorruptRow(_) => ErrorKind::DecodeError,
        }
    }

    /// Stable taxonomy code.
    pub fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }
}
