// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job handler traits and the registry workers dispatch through.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::task::Task;
use crate::types::JobType;

/// Processes tasks of one job type.
///
/// The returned string is written to the broker as the task result.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job type this handler serves.
    fn job_type(&self) -> JobType;

    /// Process one task.
    async fn process_task(&self, task: &Task) -> Result<String>;
}

/// A handler that works on a decoded payload.
///
/// Wrap it in [`Typed`] to register it; payloads that fail to decode are
/// archived without retry.
#[async_trait]
pub trait PayloadHandler: Send + Sync + 'static {
    /// Payload this handler expects.
    type Payload: DeserializeOwned + Send + Sync;

    /// Job type this handler serves.
    const JOB_TYPE: JobType;

    /// Process one decoded payload.
    async fn handle(&self, payload: Self::Payload, task: &Task) -> Result<String>;
}

/// Adapts a [`PayloadHandler`] to [`JobHandler`].
pub struct Typed<H>(pub H);

#[async_trait]
impl<H: PayloadHandler> JobHandler for Typed<H> {
    fn job_type(&self) -> JobType {
        H::JOB_TYPE
    }

    async fn process_task(&self, task: &Task) -> Result<String> {
        let payload: H::Payload = serde_json::from_value(task.payload.clone())?;
        self.0.handle(payload, task).await
    }
}

/// Wrap a payload handler for registration.
pub fn typed<H: PayloadHandler>(handler: H) -> Arc<dyn JobHandler> {
    Arc::new(Typed(handler))
}

/// Handlers keyed by job type. One handler per type; later registrations win.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<JobType, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its job type.
    pub fn register(&self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    /// Handler for `job_type`.
    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).map(|h| h.value().clone())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.iter().map(|e| *e.key()).collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ExpireSuggestionsPayload;
    use crate::types::JobOptions;
    use serde_json::json;

    struct BatchEcho;

    #[async_trait]
    impl PayloadHandler for BatchEcho {
        type Payload = ExpireSuggestionsPayload;
        const JOB_TYPE: JobType = JobType::ExpireOldSuggestions;

        async fn handle(&self, payload: Self::Payload, _task: &Task) -> Result<String> {
            Ok(format!("batch {}", payload.batch_size))
        }
    }

    fn task(payload: serde_json::Value) -> Task {
        Task::new(JobType::ExpireOldSuggestions, &payload, JobOptions::default(), None).unwrap()
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        let handler = typed(BatchEcho);
        assert_eq!(handler.job_type(), JobType::ExpireOldSuggestions);
        let result = handler
            .process_task(&task(json!({"jobId": "job_1", "timestamp": 0, "batchSize": 7})))
            .await
            .unwrap();
        assert_eq!(result, "batch 7");
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_terminal() {
        let err = typed(BatchEcho)
            .process_task(&task(json!({"batchSize": "many"})))
            .await
            .unwrap_err();
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_registry_replaces_by_type() {
        let registry = HandlerRegistry::new();
        registry.register(typed(BatchEcho));
        registry.register(typed(BatchEcho));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.job_types(), vec![JobType::ExpireOldSuggestions]);
        assert!(registry.get(JobType::SendEmail).is_none());
    }
}
