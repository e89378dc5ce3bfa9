// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Map a typed 204 into the generic shipment DTO.
//!
//! The mapper is tolerant: missing data becomes empty fields rather than
//! errors. Strict contract checks belong to [`crate::validation`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::tx204::{self, LoadTender};

/// Source of the DTO shipment ID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentIdMode {
    /// L11 reference first, then B2-04.
    RefFirst,
    /// B2-04 first, then L11 reference.
    #[default]
    B2First,
    /// L11 reference only.
    RefOnly,
    /// B2-04 only.
    B2Only,
}

impl ShipmentIdMode {
    /// Parse a mode name; unknown names fall back to [`ShipmentIdMode::B2First`].
    pub fn parse(name: &str) -> Self {
        match name {
            "ref_first" => Self::RefFirst,
            "ref_only" => Self::RefOnly,
            "b2_only" => Self::B2Only,
            _ => Self::B2First,
        }
    }
}

/// Normalized stop type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    /// Freight picked up.
    Pickup,
    /// Freight delivered.
    Delivery,
    /// Anything else.
    Other,
}

impl StopType {
    /// Parse a normalized name; unknown names are [`StopType::Other`].
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pickup" => Self::Pickup,
            "delivery" => Self::Delivery,
            _ => Self::Other,
        }
    }
}

/// Mapper options.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// DTO reference key to L11 qualifiers, first match wins.
    pub ref_map: BTreeMap<String, Vec<String>>,
    /// DTO role (`bill_to`, `shipper`, `consignee`) to N1 entity codes.
    pub party_roles: BTreeMap<String, Vec<String>>,
    /// S5-02 code to `pickup|delivery|other`.
    pub stop_type_map: BTreeMap<String, String>,
    /// L11 qualifiers that may carry the shipment ID.
    pub shipment_id_quals: Vec<String>,
    /// Shipment ID source order.
    pub shipment_id_mode: ShipmentIdMode,
    /// SCAC used when B2-02 is empty.
    pub carrier_scac_fallback: String,
    /// Emit every L11 value grouped by qualifier.
    pub include_raw_l11: bool,
    /// Restrict raw L11 output to these qualifiers.
    pub raw_l11_filter: Vec<String>,
    /// N7-11 code to equipment type.
    pub equipment_type_map: BTreeMap<String, String>,
    /// Attach RFC3339 datetimes to appointments.
    pub emit_iso_datetime: bool,
    /// IANA zone for appointment datetimes.
    pub timezone: String,
    /// L11 qualifiers carrying the service level.
    pub service_level_quals: Vec<String>,
    /// Service level value mapping.
    pub service_level_map: BTreeMap<String, String>,
    /// L11 qualifiers carrying accessorial codes.
    pub accessorial_quals: Vec<String>,
    /// Accessorial code to display name.
    pub accessorial_map: BTreeMap<String, String>,
}

fn owned_map<const N: usize>(entries: [(&str, &[&str]); N]) -> BTreeMap<String, Vec<String>> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect()
}

impl Default for Options {
    fn default() -> Self {
        let stop_type_map = [
            ("LD", "pickup"),
            ("CL", "pickup"),
            ("PL", "pickup"),
            ("UL", "delivery"),
            ("CU", "delivery"),
            ("PU", "delivery"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            ref_map: owned_map([
                ("bill_of_lading", &["BM"]),
                ("customer_po", &["PO"]),
                ("shipment_ref", &["SI", "CR"]),
            ]),
            party_roles: owned_map([
                ("bill_to", &["BT"]),
                ("consignee", &["CN", "ST"]),
                ("shipper", &["SH", "SF"]),
            ]),
            stop_type_map,
            shipment_id_quals: vec!["SI".to_string(), "CR".to_string()],
            shipment_id_mode: ShipmentIdMode::B2First,
            carrier_scac_fallback: String::new(),
            include_raw_l11: false,
            raw_l11_filter: Vec::new(),
            equipment_type_map: BTreeMap::new(),
            emit_iso_datetime: false,
            timezone: "UTC".to_string(),
            service_level_quals: Vec::new(),
            service_level_map: BTreeMap::new(),
            accessorial_quals: Vec::new(),
            accessorial_map: BTreeMap::new(),
        }
    }
}

/// Overlay `overrides` on `base`; keys in `overrides` replace those in `base`.
pub fn merge_ref_maps(
    base: &BTreeMap<String, Vec<String>>,
    overrides: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<String>> {
    let mut merged = base.clone();
    for (key, quals) in overrides {
        merged.insert(key.clone(), quals.clone());
    }
    merged
}

/// Contact in the DTO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Name.
    pub name: String,
    /// Phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Party in the DTO.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// N1 entity code.
    pub code: String,
    /// Name.
    pub name: String,
    /// Identification code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Street lines.
    pub address_lines: Vec<String>,
    /// City.
    pub city: String,
    /// Upper-cased state code.
    pub state: String,
    /// Postal code.
    pub postal_code: String,
    /// Upper-cased country code.
    pub country: String,
    /// Contacts.
    pub contacts: Vec<Contact>,
}

/// Appointment in the DTO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Date qualifier.
    pub qualifier: String,
    /// CCYYMMDD.
    pub date: String,
    /// HHMM or HHMMSS.
    pub time: String,
    /// RFC3339 datetime in the configured zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
}

/// Stop in the DTO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Stop sequence.
    pub sequence: i32,
    /// Normalized type.
    #[serde(rename = "type")]
    pub stop_type: StopType,
    /// Location.
    pub location: Party,
    /// Appointments.
    pub appointments: Vec<Appointment>,
    /// Notes.
    pub notes: Vec<String>,
}

/// Equipment in the DTO.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    /// Normalized type.
    #[serde(rename = "type")]
    pub equipment_type: String,
    /// Equipment initial.
    pub initial: String,
    /// Equipment number.
    pub number: String,
    /// Length.
    pub length: String,
}

/// Totals in the DTO.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// Weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Weight unit.
    pub weight_unit: String,
    /// Piece count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pieces: Option<i64>,
    /// Volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Volume unit.
    pub volume_unit: String,
    /// Charge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge: Option<f64>,
}

/// Commodity line in the DTO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goods {
    /// Description.
    pub description: String,
    /// Commodity code.
    pub code: String,
    /// Packaging code.
    pub packaging: String,
}

/// Accessorial service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accessorial {
    /// Code as sent by the partner.
    pub code: String,
    /// Display name from the accessorial map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Generic shipment produced from a 204.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    /// Carrier SCAC.
    pub carrier_scac: String,
    /// Shipment identifier.
    pub shipment_id: String,
    /// B2A purpose code.
    pub action_code: String,
    /// Mapped references.
    pub references: BTreeMap<String, String>,
    /// All L11 values by qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references_raw: Option<BTreeMap<String, Vec<String>>>,
    /// Bill-to party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bill_to: Option<Party>,
    /// Shipper party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipper: Option<Party>,
    /// Consignee party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consignee: Option<Party>,
    /// Stops.
    pub stops: Vec<Stop>,
    /// Equipment.
    pub equipment: Equipment,
    /// Header notes.
    pub notes: Vec<String>,
    /// Totals.
    pub totals: Totals,
    /// Commodities.
    pub goods: Vec<Goods>,
    /// Service level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_level: Option<String>,
    /// Accessorials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessorials: Option<Vec<Accessorial>>,
}

/// Map with default options.
pub fn to_shipment(lt: &LoadTender) -> Shipment {
    to_shipment_with_options(lt, &Options::default())
}

/// Map a load tender to the generic shipment DTO.
pub fn to_shipment_with_options(lt: &LoadTender, opts: &Options) -> Shipment {
    let mut references = BTreeMap::new();
    for (key, quals) in &opts.ref_map {
        if let Some(value) = first_reference(lt, quals) {
            references.insert(key.clone(), value.to_string());
        }
    }

    let references_raw = opts.include_raw_l11.then(|| {
        let mut raw: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for r in &lt.references {
            if opts.raw_l11_filter.is_empty() || opts.raw_l11_filter.contains(&r.qualifier) {
                raw.entry(r.qualifier.clone())
                    .or_default()
                    .push(r.value.clone());
            }
        }
        raw
    });

    let role = |name: &str| {
        opts.party_roles.get(name).and_then(|codes| {
            codes
                .iter()
                .find_map(|code| lt.party(code))
                .map(map_party)
        })
    };

    let carrier_scac = if lt.carrier_scac.is_empty() {
        opts.carrier_scac_fallback.clone()
    } else {
        lt.carrier_scac.clone()
    };

    let tz = if opts.emit_iso_datetime {
        match opts.timezone.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                debug!(timezone = %opts.timezone, "Unknown timezone, datetimes omitted");
                None
            }
        }
    } else {
        None
    };

    let stops = lt
        .stops
        .iter()
        .map(|s| Stop {
            sequence: s.sequence,
            stop_type: opts
                .stop_type_map
                .get(&s.reason_code)
                .map(|t| StopType::parse(t))
                .unwrap_or(StopType::Other),
            location: map_party(&s.location),
            appointments: s
                .dates
                .iter()
                .map(|d| Appointment {
                    qualifier: d.qualifier.clone(),
                    date: d.date.clone(),
                    time: d.time.clone(),
                    datetime: tz.and_then(|tz| iso_datetime(&d.date, &d.time, tz)),
                })
                .collect(),
            notes: s.notes.clone(),
        })
        .collect();

    let equipment_type = opts
        .equipment_type_map
        .get(&lt.equipment.type_code)
        .cloned()
        .unwrap_or_else(|| lt.equipment.type_code.clone());

    let service_level = first_reference(lt, &opts.service_level_quals).map(|value| {
        opts.service_level_map
            .get(value)
            .cloned()
            .unwrap_or_else(|| value.to_string())
    });

    let accessorials: Vec<Accessorial> = lt
        .references
        .iter()
        .filter(|r| opts.accessorial_quals.contains(&r.qualifier))
        .map(|r| Accessorial {
            code: r.value.clone(),
            name: opts.accessorial_map.get(&r.value).cloned(),
        })
        .collect();

    Shipment {
        carrier_scac,
        shipment_id: shipment_id(lt, opts),
        action_code: lt.action_code.clone(),
        references,
        references_raw,
        bill_to: role("bill_to"),
        shipper: role("shipper"),
        consignee: role("consignee"),
        stops,
        equipment: Equipment {
            equipment_type,
            initial: lt.equipment.initial.clone(),
            number: lt.equipment.number.clone(),
            length: lt.equipment.length.clone(),
        },
        notes: lt.notes.clone(),
        totals: Totals {
            weight: lt.totals.weight.parse().ok(),
            weight_unit: lt.totals.weight_unit.clone(),
            pieces: lt.totals.quantity.parse().ok(),
            volume: lt.totals.volume.parse().ok(),
            volume_unit: lt.totals.volume_unit.clone(),
            charge: lt.totals.charge.parse().ok(),
        },
        goods: lt
            .commodities
            .iter()
            .map(|c| Goods {
                description: c.description.clone(),
                code: c.code.clone(),
                packaging: c.packaging_code.clone(),
            })
            .collect(),
        service_level,
        accessorials: (!accessorials.is_empty()).then_some(accessorials),
    }
}

fn first_reference<'a>(lt: &'a LoadTender, quals: &[String]) -> Option<&'a str> {
    quals
        .iter()
        .find_map(|q| lt.references_for(q).find(|v| !v.is_empty()))
}

fn shipment_id(lt: &LoadTender, opts: &Options) -> String {
    let from_ref = || first_reference(lt, &opts.shipment_id_quals).map(String::from);
    let from_b2 = || (!lt.shipment_id.is_empty()).then(|| lt.shipment_id.clone());

    match opts.shipment_id_mode {
        ShipmentIdMode::RefFirst => from_ref().or_else(from_b2),
        ShipmentIdMode::B2First => from_b2().or_else(from_ref),
        ShipmentIdMode::RefOnly => from_ref(),
        ShipmentIdMode::B2Only => from_b2(),
    }
    .unwrap_or_default()
}

fn map_party(p: &tx204::Party) -> Party {
    Party {
        code: p.entity_code.clone(),
        name: p.name.clone(),
        identifier: (!p.id_code.is_empty()).then(|| p.id_code.clone()),
        address_lines: p.address_lines.clone(),
        city: p.city.clone(),
        state: p.state.to_ascii_uppercase(),
        postal_code: p.postal_code.clone(),
        country: p.country.to_ascii_uppercase(),
        contacts: p
            .contacts
            .iter()
            .map(|c| {
                let number = (!c.comm_number.is_empty()).then(|| c.comm_number.clone());
                let (phone, email) = match c.comm_qualifier.as_str() {
                    "EM" => (None, number),
                    _ => (number, None),
                };
                Contact {
                    name: c.name.clone(),
                    phone,
                    email,
                }
            })
            .collect(),
    }
}

/// RFC3339 datetime for a CCYYMMDD date and HHMM/HHMMSS time in `tz`.
pub fn iso_datetime(date: &str, time: &str, tz: Tz) -> Option<String> {
    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let time = match time.len() {
        4 => NaiveTime::parse_from_str(time, "%H%M").ok()?,
        6 => NaiveTime::parse_from_str(time, "%H%M%S").ok()?,
        _ => return None,
    };
    let local = tz
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .earliest()?;
    Some(local.to_rfc3339_opts(SecondsFormat::Secs, true))
}
