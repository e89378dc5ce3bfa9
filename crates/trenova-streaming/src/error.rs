// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stream service errors and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use trenova_core::{CoreError, ErrorKind};

/// Result type using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors raised while admitting or serving stream clients.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
    /// The request carried no complete tenant scope.
    #[error("missing tenant scope header: {0}")]
    Unauthorized(&'static str),

    /// The user already holds the maximum number of connections.
    #[error("user {user_id} reached the limit of {limit} live connections")]
    UserQuotaExceeded {
        /// User that hit the limit.
        user_id: String,
        /// Configured limit.
        limit: usize,
    },

    /// The stream already holds the maximum number of clients.
    #[error("stream {stream_key} reached the limit of {limit} clients")]
    StreamQuotaExceeded {
        /// Stream that hit the limit.
        stream_key: String,
        /// Configured limit.
        limit: usize,
    },

    /// The service has been shut down.
    #[error("stream service is shut down")]
    ShutDown,

    /// A payload could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StreamError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::UserQuotaExceeded { .. } | Self::StreamQuotaExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::UserQuotaExceeded { .. } => "USER_CONNECTION_LIMIT",
            Self::StreamQuotaExceeded { .. } => "STREAM_CONNECTION_LIMIT",
            Self::ShutDown => "SHUT_DOWN",
            Self::Encode(_) => "ENCODE_ERROR",
        }
    }

    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::ValidationError,
            Self::UserQuotaExceeded { .. } | Self::StreamQuotaExceeded { .. } => {
                ErrorKind::BusinessError
            }
            Self::ShutDown => ErrorKind::TransientIo,
            Self::Encode(_) => ErrorKind::DecodeError,
        }
    }
}

impl From<StreamError> for CoreError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::ShutDown => CoreError::Transient(err.to_string()),
            other => CoreError::Business(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.error_code(),
            message: self.to_string(),
        };

        tracing::warn!(
            error_code = body.error,
            error_message = %body.message,
            status = %status,
            "Stream request rejected"
        );

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_errors_are_429() {
        let user = StreamError::UserQuotaExceeded {
            user_id: "usr_1".into(),
            limit: 5,
        };
        let stream = StreamError::StreamQuotaExceeded {
            stream_key: "shipments:o:b".into(),
            limit: 100,
        };
        assert_eq!(user.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(stream.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(user.error_code(), "USER_CONNECTION_LIMIT");
        assert_eq!(
            stream.to_string(),
            "stream shipments:o:b reached the limit of 100 clients"
        );
    }

    #[test]
    fn test_into_core_error() {
        let core: CoreError = StreamError::ShutDown.into();
        assert_eq!(core.kind(), ErrorKind::TransientIo);
        let core: CoreError = StreamError::Unauthorized("X-User-Id").into();
        assert_eq!(core.kind(), ErrorKind::BusinessError);
    }
}
