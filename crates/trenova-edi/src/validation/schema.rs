// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON rule schema: required segments, allowed qualifiers and cardinality.
//!
//! ```json
//! {
//!   "required_segments": ["ST", "B2", "S5", "SE"],
//!   "qualifiers": { "L11": { "2": ["PO", "BM"] } },
//!   "cardinality": { "S5": { "min": 2, "max": 99 } }
//! }
//! ```
//!
//! Qualifier positions are 1-based X12 element positions (`"2"` is `L11-02`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::Issue;
use crate::error::{EdiError, Result};
use crate::x12::Segment;

const RULE_META_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "type": "object",
  "properties": {
    "required_segments": {
      "type": "array",
      "items": { "type": "string", "pattern": "^[A-Z0-9]{2,3}$" }
    },
    "qualifiers": {
      "type": "object",
      "additionalProperties": {
        "type": "object",
        "propertyNames": { "pattern": "^[1-9][0-9]*$" },
        "additionalProperties": { "type": "array", "items": { "type": "string" } }
      }
    },
    "cardinality": {
      "type": "object",
      "additionalProperties": {
        "type": "object",
        "properties": {
          "min": { "type": "integer", "minimum": 0 },
          "max": { "type": "integer", "minimum": 0 }
        },
        "additionalProperties": false
      }
    }
  }
}"#;

/// Occurrence bounds for one segment tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    /// Minimum occurrences.
    #[serde(default)]
    pub min: Option<usize>,
    /// Maximum occurrences.
    #[serde(default)]
    pub max: Option<usize>,
}

/// Partner rule schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSchema {
    /// Tags that must appear at least once.
    #[serde(default)]
    pub required_segments: Vec<String>,
    /// Tag to 1-based element position to allowed values.
    #[serde(default)]
    pub qualifiers: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Tag to occurrence bounds.
    #[serde(default)]
    pub cardinality: BTreeMap<String, Cardinality>,
}

/// Parse and check a rule schema document.
pub fn parse_schema(document: &str) -> Result<RuleSchema> {
    let instance: Value = serde_json::from_str(document)?;
    let meta: Value = serde_json::from_str(RULE_META_SCHEMA)?;
    let validator =
        jsonschema::validator_for(&meta).map_err(|e| EdiError::Schema(e.to_string()))?;

    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(EdiError::Schema(errors.join("; ")));
    }

    let schema: RuleSchema = serde_json::from_value(instance)?;
    for (tag, bounds) in &schema.cardinality {
        if let (Some(min), Some(max)) = (bounds.min, bounds.max)
            && min > max
        {
            return Err(EdiError::Schema(format!(
                "cardinality for {} has min {} above max {}",
                tag, min, max
            )));
        }
    }
    Ok(schema)
}

/// Read and parse a rule schema file.
pub fn load_schema(path: impl AsRef<Path>) -> Result<RuleSchema> {
    let document = std::fs::read_to_string(path)?;
    parse_schema(&document)
}

/// Check segments against a rule schema.
pub fn validate_with_schema(segments: &[Segment], schema: &RuleSchema) -> Vec<Issue> {
    let mut issues = Vec::new();

    for tag in &schema.required_segments {
        if !segments.iter().any(|s| s.is(tag)) {
            issues.push(Issue::error(
                "SCHEMA.SEGMENT.MISSING",
                format!("required segment {} is missing", tag),
            ));
        }
    }

    for (index, segment) in segments.iter().enumerate() {
        let Some(positions) = schema.qualifiers.get(&segment.tag.to_ascii_uppercase()) else {
            continue;
        };
        for (position, allowed) in positions {
            let Some(element) = position.parse::<usize>().ok().and_then(|p| p.checked_sub(1))
            else {
                continue;
            };
            let value = segment.value(element);
            if !value.is_empty() && !allowed.iter().any(|a| a == value) {
                issues.push(
                    Issue::error(
                        "SCHEMA.QUALIFIER.INVALID",
                        format!(
                            "{}-{:02} value '{}' is not one of {:?}",
                            segment.tag, element + 1, value, allowed
                        ),
                    )
                    .at(index, &segment.tag),
                );
            }
        }
    }

    for (tag, bounds) in &schema.cardinality {
        let count = segments.iter().filter(|s| s.is(tag)).count();
        if let Some(min) = bounds.min
            && count < min
        {
            issues.push(Issue::error(
                "SCHEMA.CARDINALITY.MIN",
                format!("{} occurs {} times, minimum is {}", tag, count, min),
            ));
        }
        if let Some(max) = bounds.max
            && count > max
        {
            issues.push(Issue::error(
                "SCHEMA.CARDINALITY.MAX",
                format!("{} occurs {} times, maximum is {}", tag, count, max),
            ));
        }
    }

    issues
}
