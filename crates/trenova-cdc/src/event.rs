// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Normalized change events.
//!
//! A decoded Debezium envelope is turned into a [`ChangeEvent`] whose row
//! states are plain JSON objects with every Avro union unwrapped. The
//! operation decides which states are present:
//!
//! | Operation | `before` | `after` |
//! |-----------|----------|---------|
//! | `create` | absent | required |
//! | `update` | required | required |
//! | `delete` | required | absent |
//! | `read` | absent | optional |

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CdcError, Result};

/// Row state of a change event.
pub type Row = Map<String, Value>;

const AVRO_PRIMITIVES: &[&str] = &[
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

/// Normalized Debezium operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Row inserted (`c`).
    Create,
    /// Row updated (`u`).
    Update,
    /// Row deleted (`d`).
    Delete,
    /// Snapshot read (`r`).
    Read,
}

impl Operation {
    /// Map a Debezium `op` code. Full names are accepted too.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" | "create" => Some(Self::Create),
            "u" | "update" => Some(Self::Update),
            "d" | "delete" => Some(Self::Delete),
            "r" | "read" => Some(Self::Read),
            _ => None,
        }
    }

    /// Lowercase name used in broadcast envelopes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `source` block of a Debezium envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceInfo {
    /// Database name.
    pub database: String,
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Connector type (e.g. `postgresql`).
    pub connector: String,
    /// Connector version.
    pub version: String,
    /// Whether the event was produced by a snapshot.
    pub snapshot: bool,
}

/// Event metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventMetadata {
    /// Connector timestamp (`ts_ms`).
    pub timestamp: i64,
    /// Source block.
    pub source: SourceInfo,
    /// Log sequence number.
    pub lsn: Option<i64>,
    /// Transaction ID (`transaction.id`).
    pub transaction_id: Option<String>,
}

/// A normalized change event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Operation.
    pub operation: Operation,
    /// Table the change applies to.
    pub table: String,
    /// Schema the table lives in.
    pub schema: String,
    /// Row before the change.
    pub before: Option<Row>,
    /// Row after the change.
    pub after: Option<Row>,
    /// Metadata.
    pub metadata: EventMetadata,
}

impl ChangeEvent {
    /// Build a change event from a decoded envelope.
    ///
    /// Fails with [`CdcError::InvalidStructure`] when `op` is missing or
    /// unknown, `source.table` is missing, or a row state the operation
    /// requires is absent.
    pub fn from_envelope(envelope: &Value) -> Result<Self> {
        let envelope = envelope
            .as_object()
            .ok_or_else(|| CdcError::invalid("envelope is not an object"))?;

        let code = envelope
            .get("op")
            .map(unwrap_optional)
            .and_then(Value::as_str)
            .ok_or_else(|| CdcError::invalid("missing or non-string op"))?;
        let operation = Operation::from_code(code)
            .ok_or_else(|| CdcError::invalid(format!("unknown operation '{code}'")))?;

        let source_value = envelope
            .get("source")
            .map(unwrap_optional)
            .and_then(Value::as_object)
            .ok_or_else(|| CdcError::invalid("missing source block"))?;
        let source = source_info(source_value)?;

        let mut before = extract_data_state(envelope.get("before"));
        let mut after = extract_data_state(envelope.get("after"));

        match operation {
            Operation::Create => {
                if after.is_none() {
                    return Err(CdcError::invalid("create event without after state"));
                }
                before = None;
            }
            Operation::Update => {
                if after.is_none() {
                    return Err(CdcError::invalid("update event without after state"));
                }
                if before.is_none() {
                    return Err(CdcError::invalid("update event without before state"));
                }
            }
            Operation::Delete => {
                if before.is_none() {
                    return Err(CdcError::invalid("delete event without before state"));
                }
                after = None;
            }
            Operation::Read => before = None,
        }

        let transaction_id = envelope
            .get("transaction")
            .map(unwrap_optional)
            .and_then(Value::as_object)
            .and_then(|tx| tx.get("id"))
            .map(unwrap_optional)
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        let metadata = EventMetadata {
            timestamp: envelope.get("ts_ms").and_then(extract_i64).unwrap_or_default(),
            lsn: source_value.get("lsn").and_then(extract_i64),
            transaction_id,
            source: source.clone(),
        };

        Ok(Self {
            operation,
            table: source.table,
            schema: source.schema,
            before,
            after,
            metadata,
        })
    }

    /// Whether the event was produced by a snapshot.
    pub fn is_snapshot(&self) -> bool {
        self.metadata.source.snapshot || self.operation == Operation::Read
    }
}

fn source_info(source: &Row) -> Result<SourceInfo> {
    let text = |key: &str| {
        source
            .get(key)
            .map(unwrap_optional)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let table = text("table");
    if table.is_empty() {
        return Err(CdcError::invalid("missing source.table"));
    }

    Ok(SourceInfo {
        database: text("db"),
        schema: text("schema"),
        table,
        connector: text("connector"),
        version: text("version"),
        snapshot: source.get("snapshot").is_some_and(parse_snapshot),
    })
}

/// Debezium reports `true`, `false`, `first`, `last` or `incremental`.
fn parse_snapshot(value: &Value) -> bool {
    match unwrap_optional(value) {
        Value::Bool(b) => *b,
        Value::String(s) => s != "false" && !s.is_empty(),
        _ => false,
    }
}

/// Extract a row state, unwrapping value wrappers and every field's union.
pub fn extract_data_state(value: Option<&Value>) -> Option<Row> {
    let row = extract_value_field(value?)?;
    Some(
        row.iter()
            .map(|(k, v)| (k.clone(), unwrap_optional(v).clone()))
            .collect(),
    )
}

/// Unwrap a row wrapper.
///
/// Accepts `{"Value": {...}}`, `{"value": {...}}`, a single-keyed wrapper
/// around an object (Avro named-record unions), or the row itself.
pub fn extract_value_field(value: &Value) -> Option<&Row> {
    let map = value.as_object()?;
    for key in ["Value", "value"] {
        if let Some(inner) = map.get(key).and_then(Value::as_object) {
            return Some(inner);
        }
    }
    if map.len() == 1
        && let Some((_, inner)) = map.iter().next()
        && let Some(inner) = inner.as_object()
    {
        return Some(inner);
    }
    Some(map)
}

/// Unwrap a JSON-encoded Avro union such as `{"string": "x"}`.
///
/// Only single-keyed objects keyed by a primitive type name or a dotted
/// full name are unwrapped; anything else is returned unchanged.
pub fn unwrap_optional(value: &Value) -> &Value {
    if let Some(map) = value.as_object()
        && map.len() == 1
        && let Some((key, inner)) = map.iter().next()
        && (AVRO_PRIMITIVES.contains(&key.as_str()) || key.contains('.'))
    {
        return inner;
    }
    value
}

/// Read an integer given as integer, float or `{"long": n}`.
pub fn extract_i64(value: &Value) -> Option<i64> {
    match unwrap_optional(value) {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
