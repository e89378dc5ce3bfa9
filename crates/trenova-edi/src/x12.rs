// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! X12 primitives: delimiter detection, segment tokenization, transaction
//! splitting and serialization.
//!
//! The ISA header is fixed width, so the separators are read from fixed byte
//! offsets of the first 106 bytes:
//!
//! | Offset | Separator |
//! |--------|-----------|
//! | 3 | element |
//! | 82 | repetition (ISA-11, only when not alphanumeric) |
//! | 104 | component (ISA-16) |
//! | 105 | segment terminator |

use serde::{Deserialize, Serialize};

use crate::error::{EdiError, Result};

/// Length of a fixed-width ISA segment including its terminator.
pub const ISA_LENGTH: usize = 106;

const ELEMENT_OFFSET: usize = 3;
const REPETITION_OFFSET: usize = 82;
const COMPONENT_OFFSET: usize = 104;
const SEGMENT_OFFSET: usize = 105;

/// Separators used by one interchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    /// Element separator.
    pub element: char,
    /// Component (sub-element) separator.
    pub component: char,
    /// Segment terminator.
    pub segment: char,
    /// Repetition separator (005010 and later).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition: Option<char>,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            element: '*',
            component: '>',
            segment: '~',
            repetition: None,
        }
    }
}

impl Delimiters {
    /// Fail if any two separators are equal.
    pub fn check(&self) -> Result<()> {
        let mut seen = vec![self.element, self.component, self.segment];
        if let Some(rep) = self.repetition {
            seen.push(rep);
        }
        for (i, a) in seen.iter().enumerate() {
            if seen[i + 1..].contains(a) {
                return Err(EdiError::Delimiter(format!("separator '{}' is used twice", a)));
            }
        }
        Ok(())
    }
}

/// One segment: a tag plus elements, each a list of components.
///
/// Element indices are zero based and exclude the tag, so `B2-04` is
/// element `3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment identifier (e.g. `ST`, `B2`).
    pub tag: String,
    /// Elements, each split into components.
    pub elements: Vec<Vec<String>>,
}

impl Segment {
    /// Build a segment from simple (single component) element values.
    pub fn new(tag: impl Into<String>, elements: &[&str]) -> Self {
        Self {
            tag: tag.into(),
            elements: elements.iter().map(|e| vec![e.to_string()]).collect(),
        }
    }

    /// Component `j` of element `i`, or `""` when absent.
    pub fn get(&self, i: usize, j: usize) -> &str {
        self.elements
            .get(i)
            .and_then(|components| components.get(j))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// First component of element `i`, or `""` when absent.
    pub fn element(&self, i: usize) -> &str {
        self.get(i, 0)
    }

    /// First component of element `i`, trimmed of padding.
    pub fn value(&self, i: usize) -> &str {
        self.element(i).trim()
    }

    /// Element `i` split on the repetition separator.
    pub fn repeats(&self, i: usize, repetition: char) -> Vec<&str> {
        self.element(i).split(repetition).collect()
    }

    /// Whether the tag matches, ignoring case.
    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

/// One `ST … SE` transaction set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxBlock {
    /// ST-01 transaction set identifier (e.g. `204`).
    pub set_id: String,
    /// ST-02 control number.
    pub control: String,
    /// Index of the ST segment in the interchange.
    pub start_index: usize,
    /// Segments from ST to SE inclusive.
    pub segments: Vec<Segment>,
}

impl TxBlock {
    /// Index of the last segment of the block in the interchange.
    pub fn end_index(&self) -> usize {
        self.start_index + self.segments.len().saturating_sub(1)
    }

    /// Whether a segment index falls inside this block.
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && index <= self.end_index()
    }
}

/// Detect separators from the ISA header.
pub fn detect_delimiters(raw: &[u8]) -> Result<Delimiters> {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let data = raw[start..].strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&raw[start..]);

    if data.len() < ISA_LENGTH {
        return Err(EdiError::Delimiter(format!(
            "buffer too short for ISA header: {} bytes",
            data.len()
        )));
    }
    if !data.starts_with(b"ISA") {
        return Err(EdiError::Delimiter("interchange does not start with ISA".to_string()));
    }

    let element = data[ELEMENT_OFFSET] as char;
    let component = data[COMPONENT_OFFSET] as char;
    let segment = data[SEGMENT_OFFSET] as char;
    let rep = data[REPETITION_OFFSET] as char;
    let repetition = (!rep.is_ascii_alphanumeric() && !rep.is_ascii_whitespace()).then_some(rep);

    let delims = Delimiters {
        element,
        component,
        segment,
        repetition,
    };
    delims.check()?;
    Ok(delims)
}

/// Split an interchange into segments.
pub fn parse_segments(raw: &[u8], delims: Delimiters) -> Result<Vec<Segment>> {
    delims
        .check()
        .map_err(|e| EdiError::Parse(e.to_string()))?;
    let text = String::from_utf8_lossy(raw);

    let mut segments = Vec::new();
    for piece in text.split(delims.segment) {
        let piece = piece.trim_matches(|c| c == '\r' || c == '\n');
        if piece.is_empty() {
            continue;
        }

        let mut parts = piece.split(delims.element);
        let tag = parts.next().unwrap_or_default().trim_start();
        if tag.is_empty() || tag.len() > 3 || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EdiError::Parse(format!(
                "invalid segment tag '{}' at segment {}",
                tag,
                segments.len()
            )));
        }

        let split_components = !tag.eq_ignore_ascii_case("ISA");
        let elements = parts
            .map(|element| {
                if split_components {
                    element.split(delims.component).map(String::from).collect()
                } else {
                    vec![element.to_string()]
                }
            })
            .collect();

        segments.push(Segment {
            tag: tag.to_string(),
            elements,
        });
    }
    Ok(segments)
}

/// Serialize segments back to X12, one terminator after each segment.
pub fn serialize(segments: &[Segment], delims: Delimiters) -> String {
    let mut out = String::new();
    let component = delims.component.to_string();
    for segment in segments {
        out.push_str(&segment.tag);
        for element in &segment.elements {
            out.push(delims.element);
            out.push_str(&element.join(&component));
        }
        out.push(delims.segment);
    }
    out
}

/// Split an interchange into `ST … SE` blocks.
///
/// Envelope balance is not checked; an ST without a closing SE yields a
/// block running to the end of the group.
pub fn split_transactions(segments: &[Segment]) -> Vec<TxBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<TxBlock> = None;

    for (index, segment) in segments.iter().enumerate() {
        if segment.is("ST") {
            if let Some(open) = current.take() {
                blocks.push(open);
            }
            current = Some(TxBlock {
                set_id: segment.value(0).to_string(),
                control: segment.value(1).to_string(),
                start_index: index,
                segments: vec![segment.clone()],
            });
            continue;
        }

        if segment.is("GE") || segment.is("IEA") {
            if let Some(open) = current.take() {
                blocks.push(open);
            }
            continue;
        }

        if let Some(block) = current.as_mut() {
            block.segments.push(segment.clone());
            if segment.is("SE") {
                if let Some(done) = current.take() {
                    blocks.push(done);
                }
            }
        }
    }

    if let Some(open) = current {
        blocks.push(open);
    }
    blocks
}

/// X12 version of the interchange, e.g. `004010`.
///
/// Reads GS-08 and falls back to ISA-12 (`00401` becomes `004010`).
pub fn extract_version(segments: &[Segment]) -> String {
    if let Some(gs) = segments.iter().find(|s| s.is("GS")) {
        let version = gs.value(7);
        if !version.is_empty() {
            return version.chars().take(6).collect();
        }
    }
    if let Some(isa) = segments.iter().find(|s| s.is("ISA")) {
        let version = isa.value(11);
        if version.len() == 5 {
            return format!("{}0", version);
        }
        return version.chars().take(6).collect();
    }
    String::new()
}
