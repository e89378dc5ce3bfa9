// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Confluent-framed Avro decoding.
//!
//! Every message starts with a magic byte `0x00` and a big-endian schema ID;
//! the rest is the Avro binary datum. Schemas are fetched from the registry
//! on first use and kept in a bounded LRU cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use apache_avro::Schema;
use apache_avro::types::Value as AvroValue;
use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::{CdcError, Result};

/// Length of the registry frame header.
pub const FRAME_HEADER_LEN: usize = 5;

const MAGIC_BYTE: u8 = 0;

/// Split a framed payload into its schema ID and datum.
pub fn parse_frame(payload: &[u8]) -> Result<(u32, &[u8])> {
    if payload.len() < FRAME_HEADER_LEN {
        return Err(CdcError::ShortMessage(payload.len()));
    }
    if payload[0] != MAGIC_BYTE {
        return Err(CdcError::Decode(format!(
            "unexpected magic byte 0x{:02x}",
            payload[0]
        )));
    }
    let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok((id, &payload[FRAME_HEADER_LEN..]))
}

/// Frame an Avro value for the given schema ID.
pub fn frame_datum(schema_id: u32, schema: &Schema, value: AvroValue) -> Result<Vec<u8>> {
    let datum = apache_avro::to_avro_datum(schema, value)?;
    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + datum.len());
    framed.push(MAGIC_BYTE);
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(&datum);
    Ok(framed)
}

/// Source of writer schemas keyed by ID.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Fetch the schema definition (JSON text) for `id`.
    async fn fetch_schema(&self, id: u32) -> Result<String>;
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

/// Confluent schema registry over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSchemaRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSchemaRegistry {
    /// Create a registry client for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn fetch_schema(&self, id: u32) -> Result<String> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CdcError::Registry {
                schema_id: id,
                message: format!("registry returned {status}"),
            });
        }

        let body: SchemaResponse = response.json().await?;
        Ok(body.schema)
    }
}

/// Registry backed by a map of pre-registered schemas.
#[derive(Debug, Default)]
pub struct StaticSchemaRegistry {
    schemas: DashMap<u32, String>,
}

impl StaticSchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema definition under `id`.
    pub fn register(&self, id: u32, schema: impl Into<String>) {
        self.schemas.insert(id, schema.into());
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn fetch_schema(&self, id: u32) -> Result<String> {
        self.schemas
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or_else(|| CdcError::Registry {
                schema_id: id,
                message: "schema not registered".to_string(),
            })
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaCacheStats {
    /// Cached schemas.
    pub size: usize,
    /// Capacity.
    pub max_size: usize,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that went to the registry.
    pub misses: u64,
    /// Schemas pushed out by newer ones.
    pub evictions: u64,
}

/// Size-bounded LRU cache of compiled schemas.
#[derive(Debug)]
pub struct SchemaCache {
    entries: Mutex<LruCache<u32, Arc<Schema>>>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SchemaCache {
    /// Create a cache holding at most `max_size` schemas (at least one).
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_size: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a schema, counting the hit or miss.
    pub fn get(&self, id: u32) -> Option<Arc<Schema>> {
        let found = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert a schema, evicting the least recently used one when full.
    pub fn insert(&self, id: u32, schema: Arc<Schema>) {
        let displaced = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id, schema);
        if let Some((displaced_id, _)) = displaced
            && displaced_id != id
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SchemaCacheStats {
        SchemaCacheStats {
            size: self.len(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Decodes framed payloads into JSON values.
pub struct AvroDecoder {
    registry: Arc<dyn SchemaRegistry>,
    cache: SchemaCache,
}

impl AvroDecoder {
    /// Create a decoder.
    pub fn new(registry: Arc<dyn SchemaRegistry>, cache_size: usize) -> Self {
        Self {
            registry,
            cache: SchemaCache::new(cache_size),
        }
    }

    /// Schema cache counters.
    pub fn cache_stats(&self) -> SchemaCacheStats {
        self.cache.stats()
    }

    /// Resolve the writer schema for `id`.
    ///
    /// Registry and parse failures are returned without touching the cache.
    pub async fn schema(&self, id: u32) -> Result<Arc<Schema>> {
        if let Some(schema) = self.cache.get(id) {
            return Ok(schema);
        }

        let definition = self.registry.fetch_schema(id).await?;
        let schema = Arc::new(Schema::parse_str(&definition)?);
        self.cache.insert(id, schema.clone());
        debug!(schema_id = id, "Cached Avro schema");
        Ok(schema)
    }

    /// Decode a framed payload.
    pub async fn decode(&self, payload: &[u8]) -> Result<Value> {
        let (id, mut datum) = parse_frame(payload)?;
        let schema = self.schema(id).await?;
        let value = apache_avro::from_avro_datum(&schema, &mut datum, None)?;
        avro_to_json(value)
    }
}

impl std::fmt::Debug for AvroDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvroDecoder")
            .field("cache", &self.cache.stats())
            .finish()
    }
}

/// Convert a decoded Avro value to JSON, unwrapping unions in place.
pub fn avro_to_json(value: AvroValue) -> Result<Value> {
    Ok(match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Bool(b),
        AvroValue::Int(i) | AvroValue::Date(i) | AvroValue::TimeMillis(i) => Value::from(i),
        AvroValue::Long(i)
        | AvroValue::TimeMicros(i)
        | AvroValue::TimestampMillis(i)
        | AvroValue::TimestampMicros(i) => Value::from(i),
        AvroValue::Float(f) => float(f64::from(f)),
        AvroValue::Double(f) => float(f),
        AvroValue::String(s) => Value::String(s),
        AvroValue::Enum(_, symbol) => Value::String(symbol),
        AvroValue::Union(_, inner) => avro_to_json(*inner)?,
        AvroValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(avro_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        AvroValue::Map(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, avro_to_json(v)?)))
                .collect::<Result<Map<_, _>>>()?,
        ),
        AvroValue::Record(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, avro_to_json(v)?)))
                .collect::<Result<Map<_, _>>>()?,
        ),
        other => Value::try_from(other)?,
    })
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
