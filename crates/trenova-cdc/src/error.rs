// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the CDC consumer.

use trenova_core::{CoreError, ErrorKind};

/// Result type using CdcError.
pub type Result<T> = std::result::Result<T, CdcError>;

/// Errors raised while decoding, normalizing or dispatching change events.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CdcError {
    /// Payload is shorter than the 5-byte registry frame header.
    #[error("message too short for Avro framing: {0} bytes")]
    ShortMessage(usize),

    /// Payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Avro schema parsing or datum decoding failed.
    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    /// Payload decoded but the envelope is malformed.
    #[error("invalid change event structure: {0}")]
    InvalidStructure(String),

    /// The schema registry could not serve a schema.
    #[error("schema registry error for schema {schema_id}: {message}")]
    Registry {
        /// Schema ID that was requested.
        schema_id: u32,
        /// Failure description.
        message: String,
    },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A table handler failed.
    #[error("handler for table {table} failed: {message}")]
    Handler {
        /// Table the handler serves.
        table: String,
        /// Failure description.
        message: String,
    },

    /// A table handler panicked.
    #[error("handler for table {table} panicked: {message}")]
    Panic {
        /// Table the handler serves.
        table: String,
        /// Panic payload.
        message: String,
    },

    /// Broker read or metadata failure.
    #[error("broker error: {0}")]
    Broker(String),

    /// `start` was called on a running consumer.
    #[error("CDC consumer is already running")]
    AlreadyRunning,

    /// JSON serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CdcError {
    /// Convenience constructor for [`CdcError::Handler`].
    pub fn handler(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Handler {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`CdcError::InvalidStructure`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShortMessage(_) | Self::Decode(_) | Self::Avro(_) | Self::Json(_) => {
                ErrorKind::DecodeError
            }
            Self::InvalidStructure(_) => ErrorKind::InvalidStructure,
            Self::Registry { .. } | Self::Http(_) | Self::Broker(_) => ErrorKind::TransientIo,
            Self::Handler { .. } => ErrorKind::HandlerFailed,
            Self::Panic { .. } => ErrorKind::Panic,
            Self::AlreadyRunning => ErrorKind::BusinessError,
        }
    }
}

impl From<CoreError> for CdcError {
    fn from(err: CoreError) -> Self {
        match err.kind() {
            ErrorKind::InvalidStructure => Self::InvalidStructure(err.to_string()),
            _ => Self::Handler {
                table: String::new(),
                message: err.to_string(),
            },
        }
    }
}
