// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Partner profiles.
//!
//! A profile is a JSON document tuning one trading partner: default
//! delimiters, the rule schema to validate with, validation overrides and
//! every mapper option. Keys are snake_case; the camelCase spellings used by
//! older profiles are accepted as aliases.
//!
//! ```json
//! {
//!   "schema_path": "testdata/schema/generic-204-4010.json",
//!   "delimiters": { "element_hex": "0x2A", "segment_terminator": "LF" },
//!   "emit_iso_datetime": true,
//!   "timezone": "America/Chicago",
//!   "references": { "customer_po": ["PO", "CO"] },
//!   "validation": { "strictness": "lenient" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{EdiError, Result};
use crate::mapper::{Options, ShipmentIdMode, merge_ref_maps};
use crate::validation::{Profile, Strictness};
use crate::x12::Delimiters;

/// Delimiter section of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelimiterConfig {
    /// Element separator as a literal character.
    pub element: String,
    /// Component separator as a literal character.
    pub component: String,
    /// Segment terminator as a literal character.
    pub segment: String,
    /// Repetition separator as a literal character.
    pub repetition: String,
    /// Element separator as `0xNN` or `\xNN`.
    pub element_hex: String,
    /// Component separator as `0xNN` or `\xNN`.
    pub component_hex: String,
    /// Segment terminator as `0xNN` or `\xNN`.
    pub segment_hex: String,
    /// Repetition separator as `0xNN` or `\xNN`.
    pub repetition_hex: String,
    /// Named terminator: `LF`, `CR`, `CRLF`, `\n`, `\r`, `\r\n` or hex.
    #[serde(alias = "segmentTerminator")]
    pub segment_terminator: String,
}

/// Delimiters a profile resolves to. `None` keeps the detected value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedDelimiters {
    /// Element separator.
    pub element: Option<char>,
    /// Component separator.
    pub component: Option<char>,
    /// Segment terminator.
    pub segment: Option<char>,
    /// Repetition separator.
    pub repetition: Option<char>,
}

fn hex_char(value: &str) -> Result<char> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("\\x"))
        .unwrap_or(value);
    if digits.len() != 2 {
        return Err(EdiError::Profile(format!("invalid hex delimiter '{}'", value)));
    }
    u8::from_str_radix(digits, 16)
        .map(char::from)
        .map_err(|_| EdiError::Profile(format!("invalid hex delimiter '{}'", value)))
}

fn pick(literal: &str, hex: &str) -> Result<Option<char>> {
    if !hex.is_empty() {
        return hex_char(hex).map(Some);
    }
    Ok(literal.chars().next())
}

impl DelimiterConfig {
    /// Resolve literal, hex and named forms. Hex wins over literal, a named
    /// terminator wins over both. `CRLF` resolves to `\n`; the parser
    /// trims the carriage return.
    pub fn resolve(&self) -> Result<ResolvedDelimiters> {
        let mut resolved = ResolvedDelimiters {
            element: pick(&self.element, &self.element_hex)?,
            component: pick(&self.component, &self.component_hex)?,
            segment: pick(&self.segment, &self.segment_hex)?,
            repetition: pick(&self.repetition, &self.repetition_hex)?,
        };

        match self.segment_terminator.as_str() {
            "" => {}
            "\\n" | "LF" | "\\r\\n" | "CRLF" => resolved.segment = Some('\n'),
            "\\r" | "CR" => resolved.segment = Some('\r'),
            other if other.starts_with("0x") || other.starts_with("\\x") => {
                resolved.segment = Some(hex_char(other)?);
            }
            other => {
                return Err(EdiError::Profile(format!(
                    "unknown segment terminator '{}'",
                    other
                )));
            }
        }

        if resolved.element.is_none() {
            return Err(EdiError::Profile("element delimiter is required".to_string()));
        }
        if resolved.segment.is_none() {
            return Err(EdiError::Profile("segment delimiter is required".to_string()));
        }
        Ok(resolved)
    }
}

/// Validation overrides. Unset fields keep the version default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOverrides {
    /// Strictness.
    pub strictness: Option<Strictness>,
    /// SE count and control check.
    pub enforce_se_count: Option<bool>,
    /// GE count and control check.
    pub enforce_ge_count: Option<bool>,
    /// IEA count and control check.
    pub enforce_iea_count: Option<bool>,
    /// Pickup and delivery requirement.
    pub require_pickup_and_delivery: Option<bool>,
    /// B2-04 requirement.
    pub require_shipment_id: Option<bool>,
}

/// One partner's configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartnerConfig {
    /// Rule schema used when the caller gives none.
    #[serde(alias = "schemaPath")]
    pub schema_path: String,
    /// Default delimiters.
    pub delimiters: Option<DelimiterConfig>,
    /// Include raw segments in shipment output.
    #[serde(alias = "includeSegments")]
    pub include_segments: bool,
    /// Attach RFC3339 datetimes to appointments.
    #[serde(alias = "emitISODateTime", alias = "emitIsoDatetime")]
    pub emit_iso_datetime: bool,
    /// IANA zone for appointment datetimes.
    pub timezone: String,
    /// Reference key to L11 qualifiers, merged over the defaults.
    pub references: BTreeMap<String, Vec<String>>,
    /// Party role to N1 entity codes, merged over the defaults.
    #[serde(alias = "partyRoles")]
    pub party_roles: BTreeMap<String, Vec<String>>,
    /// S5-02 code to stop type, merged over the defaults.
    #[serde(alias = "stopTypeMap")]
    pub stop_type_map: BTreeMap<String, String>,
    /// Shipment ID qualifiers; replaces the defaults when non-empty.
    #[serde(alias = "shipmentIdQuals")]
    pub shipment_id_quals: Vec<String>,
    /// `ref_first`, `b2_first`, `ref_only` or `b2_only`.
    #[serde(alias = "shipmentIdMode")]
    pub shipment_id_mode: String,
    /// SCAC used when B2-02 is empty.
    #[serde(alias = "carrierScacFallback")]
    pub carrier_scac_fallback: String,
    /// Emit raw L11 values.
    #[serde(alias = "includeRawL11")]
    pub include_raw_l11: bool,
    /// Raw L11 qualifier filter.
    #[serde(alias = "rawL11Filter")]
    pub raw_l11_filter: Vec<String>,
    /// Equipment type mapping.
    #[serde(alias = "equipmentTypeMap")]
    pub equipment_type_map: BTreeMap<String, String>,
    /// Service level qualifiers.
    #[serde(alias = "serviceLevelQuals")]
    pub service_level_quals: Vec<String>,
    /// Service level mapping.
    #[serde(alias = "serviceLevelMap")]
    pub service_level_map: BTreeMap<String, String>,
    /// Accessorial qualifiers.
    #[serde(alias = "accessorialQuals")]
    pub accessorial_quals: Vec<String>,
    /// Accessorial names.
    #[serde(alias = "accessorialMap")]
    pub accessorial_map: BTreeMap<String, String>,
    /// Validation overrides.
    pub validation: ValidationOverrides,
}

impl PartnerConfig {
    /// Parse a profile document and check its delimiters.
    pub fn from_json(document: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(document)?;
        if let Some(delimiters) = &config.delimiters {
            delimiters.resolve()?;
        }
        Ok(config)
    }

    /// Read a profile file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json(&document)
    }

    /// Overlay profile delimiters on detected ones.
    pub fn apply_delimiters(&self, delims: &mut Delimiters) -> Result<()> {
        let Some(config) = &self.delimiters else {
            return Ok(());
        };
        let resolved = config.resolve()?;
        if let Some(c) = resolved.element {
            delims.element = c;
        }
        if let Some(c) = resolved.component {
            delims.component = c;
        }
        if let Some(c) = resolved.segment {
            delims.segment = c;
        }
        if resolved.repetition.is_some() {
            delims.repetition = resolved.repetition;
        }
        Ok(())
    }

    /// Apply validation overrides to a base profile.
    pub fn apply_validation(&self, mut profile: Profile) -> Profile {
        let v = &self.validation;
        if let Some(strictness) = v.strictness {
            profile.strictness = strictness;
        }
        if let Some(on) = v.enforce_se_count {
            profile.enforce_se_count = on;
        }
        if let Some(on) = v.enforce_ge_count {
            profile.enforce_ge_count = on;
        }
        if let Some(on) = v.enforce_iea_count {
            profile.enforce_iea_count = on;
        }
        if let Some(on) = v.require_pickup_and_delivery {
            profile.require_pickup_and_delivery = on;
        }
        if let Some(on) = v.require_shipment_id {
            profile.require_shipment_id = on;
        }
        profile
    }

    /// Mapper options with this profile laid over the defaults.
    pub fn to_mapper_options(&self) -> Options {
        let mut opts = Options::default();
        opts.ref_map = merge_ref_maps(&opts.ref_map, &self.references);
        opts.party_roles = merge_ref_maps(&opts.party_roles, &self.party_roles);
        for (code, kind) in &self.stop_type_map {
            opts.stop_type_map
                .insert(code.to_ascii_uppercase(), kind.to_ascii_lowercase());
        }
        if !self.shipment_id_quals.is_empty() {
            opts.shipment_id_quals = self.shipment_id_quals.clone();
        }
        if !self.shipment_id_mode.is_empty() {
            opts.shipment_id_mode = ShipmentIdMode::parse(&self.shipment_id_mode);
        }
        opts.carrier_scac_fallback = self.carrier_scac_fallback.clone();
        opts.include_raw_l11 = self.include_raw_l11;
        opts.raw_l11_filter = self.raw_l11_filter.clone();
        opts.equipment_type_map = self.equipment_type_map.clone();
        opts.emit_iso_datetime = self.emit_iso_datetime;
        if !self.timezone.is_empty() {
            opts.timezone = self.timezone.clone();
        }
        opts.service_level_quals = self.service_level_quals.clone();
        opts.service_level_map = self.service_level_map.clone();
        opts.accessorial_quals = self.accessorial_quals.clone();
        opts.accessorial_map = self.accessorial_map.clone();
        opts
    }
}

/// Profiles keyed by partner ID (the file stem).
#[derive(Debug, Clone, Default)]
pub struct ProfileManager {
    profiles: BTreeMap<String, PartnerConfig>,
}

impl ProfileManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file in `dir`. Files that fail to parse are
    /// skipped with a warning.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut manager = Self::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(partner_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match PartnerConfig::load(&path) {
                Ok(config) => {
                    debug!(partner_id = %partner_id, "Loaded partner profile");
                    manager.insert(partner_id, config);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping invalid partner profile");
                }
            }
        }
        Ok(manager)
    }

    /// Register a profile.
    pub fn insert(&mut self, partner_id: impl Into<String>, config: PartnerConfig) {
        self.profiles.insert(partner_id.into(), config);
    }

    /// Look up a profile.
    pub fn get(&self, partner_id: &str) -> Result<&PartnerConfig> {
        self.profiles
            .get(partner_id)
            .ok_or_else(|| EdiError::ProfileNotFound(partner_id.to_string()))
    }

    /// Known partner IDs in order.
    pub fn partner_ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Number of loaded profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// True when no profile is loaded.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_aliases() {
        let config = PartnerConfig::from_json(
            r#"{"schemaPath": "s.json", "emitISODateTime": true, "includeSegments": true, "timezone": "UTC"}"#,
        )
        .unwrap();
        assert_eq!(config.schema_path, "s.json");
        assert!(config.emit_iso_datetime);
        assert!(config.include_segments);
    }

    #[test]
    fn test_hex_and_named_delimiters() {
        let config = PartnerConfig::from_json(
            r#"{"delimiters": {"element_hex": "0x7C", "component": "^", "segment_terminator": "CRLF", "repetition_hex": "\\x5E"}}"#,
        )
        .unwrap();
        let mut delims = Delimiters::default();
        config.apply_delimiters(&mut delims).unwrap();
        assert_eq!(delims.element, '|');
        assert_eq!(delims.component, '^');
        assert_eq!(delims.segment, '\n');
        assert_eq!(delims.repetition, Some('^'));
    }

    #[test]
    fn test_delimiters_require_element_and_segment() {
        let err = PartnerConfig::from_json(r#"{"delimiters": {"element": "*"}}"#).unwrap_err();
        assert!(err.to_string().contains("segment delimiter is required"));

        let err = PartnerConfig::from_json(r#"{"delimiters": {"segment": "~"}}"#).unwrap_err();
        assert!(err.to_string().contains("element delimiter is required"));

        let err =
            PartnerConfig::from_json(r#"{"delimiters": {"element_hex": "0x2", "segment": "~"}}"#)
                .unwrap_err();
        assert!(matches!(err, EdiError::Profile(_)));
    }

    #[test]
    fn test_no_delimiter_section_keeps_detected() {
        let config = PartnerConfig::from_json("{}").unwrap();
        let mut delims = Delimiters::default();
        config.apply_delimiters(&mut delims).unwrap();
        assert_eq!(delims, Delimiters::default());
    }

    #[test]
    fn test_to_mapper_options_merges_defaults() {
        let config = PartnerConfig::from_json(
            r#"{
                "references": {"customer_po": ["CO"], "load_number": ["LO"]},
                "stop_type_map": {"xd": "Delivery"},
                "shipment_id_mode": "ref_first",
                "timezone": "America/Chicago",
                "emit_iso_datetime": true
            }"#,
        )
        .unwrap();
        let opts = config.to_mapper_options();
        assert_eq!(opts.ref_map["customer_po"], vec!["CO"]);
        assert_eq!(opts.ref_map["load_number"], vec!["LO"]);
        assert_eq!(opts.ref_map["bill_of_lading"], vec!["BM"]);
        assert_eq!(opts.stop_type_map["XD"], "delivery");
        assert_eq!(opts.stop_type_map["LD"], "pickup");
        assert_eq!(opts.shipment_id_mode, ShipmentIdMode::RefFirst);
        assert_eq!(opts.timezone, "America/Chicago");
        assert!(opts.emit_iso_datetime);
    }

    #[test]
    fn test_apply_validation() {
        let config = PartnerConfig::from_json(
            r#"{"validation": {"strictness": "lenient", "require_pickup_and_delivery": false}}"#,
        )
        .unwrap();
        let profile = config.apply_validation(Profile::strict());
        assert_eq!(profile.strictness, Strictness::Lenient);
        assert!(!profile.require_pickup_and_delivery);
        assert!(profile.enforce_se_count);
    }

    #[test]
    fn test_profile_manager_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("acme-4010.json"), r#"{"timezone": "UTC"}"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manager = ProfileManager::load_dir(dir.path()).unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get("acme-4010").unwrap().timezone, "UTC");
        assert!(matches!(
            manager.get("globex").unwrap_err(),
            EdiError::ProfileNotFound(_)
        ));
    }
}
