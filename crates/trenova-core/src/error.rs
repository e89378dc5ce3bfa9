// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for trenova-core.
//!
//! [`ErrorKind`] is the taxonomy shared by every subsystem; each crate's own
//! error enum maps onto it so metrics and logs use the same vocabulary.

use std::fmt;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Cross-subsystem error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Payload could not be decoded (Avro, X12 delimiters or segments).
    DecodeError,
    /// Payload decoded but its structure is not what was expected.
    InvalidStructure,
    /// A registered handler returned an error.
    HandlerFailed,
    /// Contract validation failed.
    ValidationError,
    /// A business rule rejected the operation.
    BusinessError,
    /// Broker, registry or store I/O failed (possibly transient).
    TransientIo,
    /// A handler or worker loop panicked.
    Panic,
}

impl ErrorKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecodeError => "decode_error",
            Self::InvalidStructure => "invalid_structure",
            Self::HandlerFailed => "handler_failed",
            Self::ValidationError => "validation_error",
            Self::BusinessError => "business_error",
            Self::TransientIo => "transient_io",
            Self::Panic => "panic",
        }
    }

    /// Whether errors of this kind are worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::HandlerFailed | Self::TransientIo | Self::Panic)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by collaborator ports and domain helpers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Entity was not found.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Entity type (e.g. "shipment").
        entity: &'static str,
        /// Entity ID.
        id: String,
    },

    /// Input validation failed.
    #[error("Validation error on '{field}': {message}")]
    Validation {
        /// Field that failed validation.
        field: String,
        /// Validation message.
        message: String,
    },

    /// A business rule rejected the operation.
    #[error("Business rule violated: {0}")]
    Business(String),

    /// Store operation failed.
    #[error("Database error during {operation}: {details}")]
    Database {
        /// Operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Remote collaborator unavailable or timed out.
    #[error("Transient error: {0}")]
    Transient(String),
}

impl CoreError {
    /// Convenience constructor for [`CoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Convenience constructor for [`CoreError::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`CoreError::Database`].
    pub fn database(operation: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::Database {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Business(_) => "BUSINESS_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Transient(_) => "TRANSIENT_ERROR",
        }
    }

    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::Business(_) => ErrorKind::BusinessError,
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::Database { .. } | Self::Transient(_) => ErrorKind::TransientIo,
        }
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
