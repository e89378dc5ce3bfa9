// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the job engine.

use trenova_core::{CoreError, ErrorKind};
use trenova_lanes::LaneError;

use crate::types::JobType;

/// Result type using JobError.
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors raised while enqueueing, scheduling or processing jobs.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum JobError {
    /// Redis command or connection failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Payload or task record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored task names a job type this build does not know.
    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),

    /// The payload decoded but is missing required fields.
    #[error("Invalid payload for {job_type}: {message}")]
    InvalidPayload {
        /// Job type being processed.
        job_type: JobType,
        /// What is wrong with the payload.
        message: String,
    },

    /// No handler is registered for the task's job type.
    #[error("No handler registered for {0}")]
    NoHandler(JobType),

    /// A task with the same unique key is already queued.
    #[error("Duplicate task for unique key '{0}'")]
    Duplicate(String),

    /// A handler returned an error.
    #[error("Handler for {job_type} failed: {message}")]
    Handler {
        /// Job type being processed.
        job_type: JobType,
        /// Failure description.
        message: String,
    },

    /// A handler did not finish within its timeout.
    #[error("Handler for {job_type} timed out after {secs}s")]
    Timeout {
        /// Job type being processed.
        job_type: JobType,
        /// Timeout that elapsed.
        secs: u64,
    },

    /// The task's deadline passed before it could run.
    #[error("Deadline exceeded for task '{0}'")]
    DeadlineExceeded(String),

    /// A handler panicked.
    #[error("Handler for {job_type} panicked: {message}")]
    Panic {
        /// Job type being processed.
        job_type: JobType,
        /// Panic payload.
        message: String,
    },

    /// A cron or `@every` expression could not be parsed.
    #[error("Invalid schedule '{spec}': {message}")]
    InvalidSchedule {
        /// Expression as written.
        spec: String,
        /// Parser message.
        message: String,
    },

    /// A collaborator port failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Pattern detection or suggestion handling failed.
    #[error(transparent)]
    Lane(#[from] LaneError),

    /// Start called on a running service.
    #[error("Job service is already running")]
    AlreadyRunning,
}

impl JobError {
    /// Convenience constructor for [`JobError::InvalidPayload`].
    pub fn invalid_payload(job_type: JobType, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            job_type,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`JobError::Handler`].
    pub fn handler(job_type: JobType, message: impl Into<String>) -> Self {
        Self::Handler {
            job_type,
            message: message.into(),
        }
    }

    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Redis(_) => ErrorKind::TransientIo,
            Self::Serialization(_) => ErrorKind::DecodeError,
            Self::UnknownJobType(_) | Self::NoHandler(_) => ErrorKind::InvalidStructure,
            Self::InvalidPayload { .. } | Self::InvalidSchedule { .. } => {
                ErrorKind::ValidationError
            }
            Self::Duplicate(_) | Self::DeadlineExceeded(_) | Self::AlreadyRunning => {
                ErrorKind::BusinessError
            }
            Self::Handler { .. } | Self::Timeout { .. } => ErrorKind::HandlerFailed,
            Self::Panic { .. } => ErrorKind::Panic,
            Self::Core(e) => e.kind(),
            Self::Lane(e) => e.kind(),
        }
    }

    /// Whether the worker should schedule another attempt.
    pub fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// Stable taxonomy code.
    pub fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }
}
