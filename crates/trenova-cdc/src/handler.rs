// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Table handlers and their registry.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::error::Result;
use crate::event::ChangeEvent;

/// Processes change events for one table.
#[async_trait]
pub trait CdcEventHandler: Send + Sync {
    /// Table this handler serves.
    fn table_name(&self) -> &str;

    /// Handle one event.
    async fn handle_event(&self, event: &ChangeEvent) -> Result<()>;
}

/// Concurrent map of table name to handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Arc<dyn CdcEventHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its table name, replacing any previous one.
    pub fn register(&self, handler: Arc<dyn CdcEventHandler>) {
        let table = handler.table_name().to_string();
        info!(table = %table, "Registered CDC handler");
        self.handlers.insert(table, handler);
    }

    /// Handler for `table`.
    pub fn get(&self, table: &str) -> Option<Arc<dyn CdcEventHandler>> {
        self.handlers.get(table).map(|h| h.value().clone())
    }

    /// Registered table names, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<_> = self.handlers.iter().map(|e| e.key().clone()).collect();
        tables.sort();
        tables
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tables", &self.tables())
            .finish()
    }
}

/// Runs several handlers for the same table in registration order.
///
/// Every handler sees the event even if an earlier one failed; the first
/// error is returned.
pub struct FanoutHandler {
    table: String,
    handlers: Vec<Arc<dyn CdcEventHandler>>,
}

impl FanoutHandler {
    /// Create an empty fan-out for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            handlers: Vec::new(),
        }
    }

    /// Append a handler.
    pub fn with(mut self, handler: Arc<dyn CdcEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }
}

#[async_trait]
impl CdcEventHandler for FanoutHandler {
    fn table_name(&self) -> &str {
        &self.table
    }

    async fn handle_event(&self, event: &ChangeEvent) -> Result<()> {
        let mut first_error = None;
        for handler in &self.handlers {
            if let Err(e) = handler.handle_event(event).await
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
