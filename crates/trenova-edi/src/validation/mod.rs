// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! 204 contract validation.
//!
//! The validator never fails; every finding is an [`Issue`]. Envelope
//! findings (ISA/GS/GE/IEA) can be removed with [`filter_envelope_issues`] so
//! that a single `ST … SE` block is judged on its own content.

mod schema;

pub use schema::{Cardinality, RuleSchema, load_schema, parse_schema, validate_with_schema};

use serde::{Deserialize, Serialize};

use crate::mapper::{Options, StopType};
use crate::x12::{Segment, extract_version, split_transactions};

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Contract violation.
    Error,
    /// Suspicious but acceptable.
    Warning,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Stable code such as `SE.COUNT`.
    pub code: String,
    /// Severity.
    pub severity: Severity,
    /// Index of the offending segment in the validated slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<usize>,
    /// Tag of the offending segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Human readable message.
    pub message: String,
}

impl Issue {
    /// Error not tied to a segment.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Error,
            segment_index: None,
            tag: None,
            message: message.into(),
        }
    }

    /// Warning not tied to a segment.
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    /// Attach the offending segment.
    pub fn at(mut self, index: usize, tag: &str) -> Self {
        self.segment_index = Some(index);
        self.tag = Some(tag.to_string());
        self
    }

    /// Whether this finding is about the interchange or group envelope.
    pub fn is_envelope(&self) -> bool {
        ENVELOPE_CODES.contains(&self.code.as_str())
    }
}

/// Codes describing ISA/GS/GE/IEA findings.
pub const ENVELOPE_CODES: &[&str] = &[
    "ISA.MISSING",
    "GS.MISSING",
    "GE.MISSING",
    "IEA.MISSING",
    "GE.COUNT",
    "GE.CTRL.MISMATCH",
    "IEA.COUNT",
    "IEA.CTRL.MISMATCH",
];

/// How hard content findings bite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Content findings are errors.
    #[default]
    Strict,
    /// Content findings are warnings; envelope structure stays an error.
    Lenient,
}

/// Validation profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Strictness.
    pub strictness: Strictness,
    /// Check SE-01 against the block length and SE-02 against ST-02.
    pub enforce_se_count: bool,
    /// Check GE-01 against the ST count and GE-02 against GS-06.
    pub enforce_ge_count: bool,
    /// Check IEA-01 against the GS count and IEA-02 against ISA-13.
    pub enforce_iea_count: bool,
    /// Require at least one pickup and one delivery stop.
    pub require_pickup_and_delivery: bool,
    /// Require B2-04.
    pub require_shipment_id: bool,
}

impl Profile {
    /// Profile with every check on.
    pub fn strict() -> Self {
        Self {
            strictness: Strictness::Strict,
            enforce_se_count: true,
            enforce_ge_count: true,
            enforce_iea_count: true,
            require_pickup_and_delivery: true,
            require_shipment_id: true,
        }
    }

    /// Profile that only checks envelope structure.
    pub fn lenient() -> Self {
        Self {
            strictness: Strictness::Lenient,
            enforce_se_count: false,
            enforce_ge_count: false,
            enforce_iea_count: false,
            require_pickup_and_delivery: false,
            require_shipment_id: false,
        }
    }

    /// Relax the profile the way `--lenient` does.
    pub fn relaxed(mut self) -> Self {
        self.strictness = Strictness::Lenient;
        self.enforce_se_count = false;
        self.require_pickup_and_delivery = false;
        self
    }

    fn content(&self, code: &str, message: impl Into<String>) -> Issue {
        match self.strictness {
            Strictness::Strict => Issue::error(code, message),
            Strictness::Lenient => Issue::warning(code, message),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::strict()
    }
}

/// Conservative defaults for an X12 version.
pub fn default_profile_for_version(version: &str) -> Profile {
    match version {
        "004010" | "005010" | "006020" => Profile::strict(),
        _ => Profile::lenient(),
    }
}

/// Validate a 204 interchange (or a single `ST … SE` block).
pub fn validate_204_with_profile(segments: &[Segment], profile: &Profile) -> Vec<Issue> {
    let mut issues = Vec::new();
    validate_envelope(segments, profile, &mut issues);

    let blocks = split_transactions(segments);
    if blocks.is_empty() {
        issues.push(Issue::error("ST.MISSING", "no ST transaction set found"));
        return issues;
    }

    let stop_types = Options::default().stop_type_map;
    for block in &blocks {
        let base = block.start_index;
        let segs = &block.segments;
        let st_control = segs[0].value(1);

        match segs.iter().rposition(|s| s.is("SE")) {
            None => issues.push(
                Issue::error("SE.MISSING", format!("transaction {} has no SE", st_control))
                    .at(base, "ST"),
            ),
            Some(se_pos) if profile.enforce_se_count => {
                let se = &segs[se_pos];
                let expected = se_pos + 1;
                if se.value(0).parse::<usize>().ok() != Some(expected) {
                    issues.push(
                        Issue::error(
                            "SE.COUNT",
                            format!("SE-01 is '{}', expected {}", se.value(0), expected),
                        )
                        .at(base + se_pos, "SE"),
                    );
                }
                if se.value(1) != st_control {
                    issues.push(
                        Issue::error(
                            "SE.CTRL.MISMATCH",
                            format!("SE-02 '{}' does not match ST-02 '{}'", se.value(1), st_control),
                        )
                        .at(base + se_pos, "SE"),
                    );
                }
            }
            Some(_) => {}
        }

        if block.set_id != "204" {
            continue;
        }

        match segs.iter().position(|s| s.is("B2")) {
            None => issues.push(profile.content("B2.MISSING", "B2 segment is required").at(base, "ST")),
            Some(pos) => {
                if profile.require_shipment_id && segs[pos].value(3).is_empty() {
                    issues.push(
                        profile
                            .content("B2.SHIPMENT_ID.MISSING", "B2-04 shipment id is empty")
                            .at(base + pos, "B2"),
                    );
                }
            }
        }

        let stops: Vec<&Segment> = segs.iter().filter(|s| s.is("S5")).collect();
        if stops.is_empty() {
            issues.push(profile.content("S5.MISSING", "at least one S5 stop is required").at(base, "ST"));
        } else if profile.require_pickup_and_delivery {
            let kind = |s: &&Segment| {
                stop_types
                    .get(s.value(1))
                    .map(|t| StopType::parse(t))
                    .unwrap_or(StopType::Other)
            };
            if !stops.iter().any(|s| kind(s) == StopType::Pickup) {
                issues.push(profile.content("STOP.PICKUP.MISSING", "no pickup stop").at(base, "ST"));
            }
            if !stops.iter().any(|s| kind(s) == StopType::Delivery) {
                issues.push(
                    profile
                        .content("STOP.DELIVERY.MISSING", "no delivery stop")
                        .at(base, "ST"),
                );
            }
        }
    }

    issues
}

fn validate_envelope(segments: &[Segment], profile: &Profile, issues: &mut Vec<Issue>) {
    let position = |tag: &str| segments.iter().position(|s| s.is(tag));
    let isa = position("ISA");
    let gs = position("GS");
    let ge = segments.iter().rposition(|s| s.is("GE"));
    let iea = segments.iter().rposition(|s| s.is("IEA"));

    if isa.is_none() {
        issues.push(Issue::error("ISA.MISSING", "ISA interchange header is missing"));
    }
    if gs.is_none() {
        issues.push(Issue::error("GS.MISSING", "GS functional group header is missing"));
    }
    if ge.is_none() {
        issues.push(Issue::error("GE.MISSING", "GE functional group trailer is missing"));
    }
    if iea.is_none() {
        issues.push(Issue::error("IEA.MISSING", "IEA interchange trailer is missing"));
    }

    if let (Some(gs), Some(ge)) = (gs, ge)
        && profile.enforce_ge_count
    {
        let st_count = segments.iter().filter(|s| s.is("ST")).count();
        if segments[ge].value(0).parse::<usize>().ok() != Some(st_count) {
            issues.push(
                Issue::error(
                    "GE.COUNT",
                    format!("GE-01 is '{}', expected {}", segments[ge].value(0), st_count),
                )
                .at(ge, "GE"),
            );
        }
        if segments[ge].value(1) != segments[gs].value(5) {
            issues.push(
                Issue::error("GE.CTRL.MISMATCH", "GE-02 does not match GS-06").at(ge, "GE"),
            );
        }
    }

    if let (Some(isa), Some(iea)) = (isa, iea)
        && profile.enforce_iea_count
    {
        let gs_count = segments.iter().filter(|s| s.is("GS")).count();
        if segments[iea].value(0).parse::<usize>().ok() != Some(gs_count) {
            issues.push(
                Issue::error(
                    "IEA.COUNT",
                    format!("IEA-01 is '{}', expected {}", segments[iea].value(0), gs_count),
                )
                .at(iea, "IEA"),
            );
        }
        if segments[iea].value(1) != segments[isa].value(12) {
            issues.push(
                Issue::error("IEA.CTRL.MISMATCH", "IEA-02 does not match ISA-13").at(iea, "IEA"),
            );
        }
    }
}

/// Validate one `ST … SE` block with optional rule schema, dropping envelope
/// findings.
///
/// This is the single policy used for per-transaction decisions (999
/// acknowledgments, multi-transaction output).
pub fn validate_transaction(
    segments: &[Segment],
    profile: &Profile,
    schema: Option<&RuleSchema>,
) -> Vec<Issue> {
    let mut issues = validate_204_with_profile(segments, profile);
    if let Some(schema) = schema {
        issues.extend(validate_with_schema(segments, schema));
    }
    filter_envelope_issues(issues)
}

/// Profile for a segment slice, from its version.
pub fn profile_for(segments: &[Segment]) -> Profile {
    default_profile_for_version(&extract_version(segments))
}

/// Drop envelope-scoped findings.
pub fn filter_envelope_issues(issues: Vec<Issue>) -> Vec<Issue> {
    issues.into_iter().filter(|i| !i.is_envelope()).collect()
}

/// Whether any finding is an error.
pub fn has_error(issues: &[Issue]) -> bool {
    issues.iter().any(|i| i.severity == Severity::Error)
}
