// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Consumer counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::avro::SchemaCacheStats;
use crate::error::CdcError;
use crate::reader::ReaderStats;

/// Live counters shared by the ingest loop and the workers.
#[derive(Debug, Default)]
pub struct CdcCounters {
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
    decode_errors: AtomicU64,
    invalid_structures: AtomicU64,
    handler_failures: AtomicU64,
    panics: AtomicU64,
    retries: AtomicU64,
    inline_fallbacks: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl CdcCounters {
    counter! {
        received => received,
        processed => processed,
        dropped => dropped,
        skipped => skipped,
        retried => retries,
        inline_fallback => inline_fallbacks,
        panicked => panics,
    }

    /// Record a terminal error by its kind.
    pub(crate) fn record_error(&self, error: &CdcError) {
        let counter = match error {
            CdcError::ShortMessage(_) => &self.dropped,
            CdcError::InvalidStructure(_) => &self.invalid_structures,
            CdcError::Handler { .. } | CdcError::Panic { .. } => &self.handler_failures,
            _ => &self.decode_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CdcMetrics {
    /// Whether the consumer is running.
    pub running: bool,
    /// Number of registered handlers.
    pub handlers_registered: usize,
    /// Tables with a handler.
    pub tables: Vec<String>,
    /// Schema cache counters.
    pub schema_cache: SchemaCacheStats,
    /// Messages read from the broker.
    pub messages_received: u64,
    /// Messages handled successfully.
    pub messages_processed: u64,
    /// Messages dropped before decoding (short frames).
    pub messages_dropped: u64,
    /// Messages for tables without a handler.
    pub messages_skipped: u64,
    /// Avro or registry failures.
    pub decode_errors: u64,
    /// Malformed envelopes.
    pub invalid_structures: u64,
    /// Events whose handler failed after every retry.
    pub handler_failures: u64,
    /// Handler panics caught.
    pub handler_panics: u64,
    /// Handler retries.
    pub retries: u64,
    /// Messages processed on the ingest task because the channel was full.
    pub inline_fallbacks: u64,
    /// Reader counters.
    pub reader: ReaderStats,
}

impl CdcMetrics {
    pub(crate) fn from_counters(counters: &CdcCounters) -> Self {
        Self {
            messages_received: CdcCounters::load(&counters.received),
            messages_processed: CdcCounters::load(&counters.processed),
            messages_dropped: CdcCounters::load(&counters.dropped),
            messages_skipped: CdcCounters::load(&counters.skipped),
            decode_errors: CdcCounters::load(&counters.decode_errors),
            invalid_structures: CdcCounters::load(&counters.invalid_structures),
            handler_failures: CdcCounters::load(&counters.handler_failures),
            handler_panics: CdcCounters::load(&counters.panics),
            retries: CdcCounters::load(&counters.retries),
            inline_fallbacks: CdcCounters::load(&counters.inline_fallbacks),
            ..Default::default()
        }
    }

    /// Share of schema lookups served from the cache.
    pub fn schema_cache_hit_rate(&self) -> f64 {
        let total = self.schema_cache.hits + self.schema_cache.misses;
        if total == 0 {
            0.0
        } else {
            self.schema_cache.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_by_kind() {
        let counters = CdcCounters::default();
        counters.record_error(&CdcError::ShortMessage(2));
        counters.record_error(&CdcError::invalid("no table"));
        counters.record_error(&CdcError::Decode("bad".into()));
        counters.record_error(&CdcError::handler("shipments", "x"));
        counters.received();
        counters.retried();

        let metrics = CdcMetrics::from_counters(&counters);
        assert_eq!(metrics.messages_dropped, 1);
        assert_eq!(metrics.invalid_structures, 1);
        assert_eq!(metrics.decode_errors, 1);
        assert_eq!(metrics.handler_failures, 1);
        assert_eq!(metrics.messages_received, 1);
        assert_eq!(metrics.retries, 1);
    }

    #[test]
    fn test_hit_rate() {
        let mut metrics = CdcMetrics::default();
        assert_eq!(metrics.schema_cache_hit_rate(), 0.0);
        metrics.schema_cache.hits = 3;
        metrics.schema_cache.misses = 1;
        assert_eq!(metrics.schema_cache_hit_rate(), 0.75);
    }
}
