// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for trenova-edi.

use thiserror::Error;

/// Result type for EDI operations.
pub type Result<T> = std::result::Result<T, EdiError>;

/// Errors raised while reading, parsing or configuring EDI processing.
///
/// Contract violations inside a well-formed interchange are not errors; they
/// are reported as [`Issue`](crate::validation::Issue)s by the validator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EdiError {
    /// ISA header missing, too short, or separators collide.
    #[error("delimiter detection failed: {0}")]
    Delimiter(String),

    /// Segment stream could not be tokenized.
    #[error("parse error: {0}")]
    Parse(String),

    /// Rule schema is not valid.
    #[error("invalid rule schema: {0}")]
    Schema(String),

    /// Partner profile is not valid.
    #[error("invalid partner profile: {0}")]
    Profile(String),

    /// Partner profile was requested but never loaded.
    #[error("profile not found for partner: {0}")]
    ProfileNotFound(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EdiError {
    /// Stable taxonomy code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delimiter(_) | Self::Parse(_) => "decode_error",
            Self::Schema(_) | Self::Profile(_) | Self::ProfileNotFound(_) | Self::Json(_) => {
                "validation_error"
            }
            Self::Io(_) => "transient_io",
        }
    }
}
