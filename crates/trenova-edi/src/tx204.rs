// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed X12 204 Motor Carrier Load Tender.
//!
//! [`build_from_segments`] makes a single pass over the segment vector.
//! Party segments (`N1/N3/N4/G61`) and notes populate the header until the
//! first `S5` is seen; after that they populate the current stop.

use serde::{Deserialize, Serialize};

use crate::x12::Segment;

/// ST control data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// ST-01.
    pub set_id: String,
    /// ST-02.
    pub control_number: String,
}

/// One L11 reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// L11-02 qualifier.
    pub qualifier: String,
    /// L11-01 value.
    pub value: String,
    /// L11-03 description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// G61 contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Contact function code.
    pub function_code: String,
    /// Name.
    pub name: String,
    /// Communication number qualifier (TE, EM, FX).
    pub comm_qualifier: String,
    /// Communication number.
    pub comm_number: String,
}

/// N1 loop party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// N1-01 entity identifier code (BT, SH, ST, CN, SF).
    pub entity_code: String,
    /// N1-02 name.
    pub name: String,
    /// N1-03 identification code qualifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_qualifier: String,
    /// N1-04 identification code.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_code: String,
    /// N3 address lines.
    #[serde(default)]
    pub address_lines: Vec<String>,
    /// N4-01.
    #[serde(default)]
    pub city: String,
    /// N4-02.
    #[serde(default)]
    pub state: String,
    /// N4-03.
    #[serde(default)]
    pub postal_code: String,
    /// N4-04.
    #[serde(default)]
    pub country: String,
    /// G61 contacts.
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

/// DTM or G62 date/time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTimeRef {
    /// Date qualifier.
    pub qualifier: String,
    /// CCYYMMDD.
    pub date: String,
    /// HHMM or HHMMSS.
    pub time: String,
}

/// S5 stop loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOff {
    /// S5-01 stop sequence.
    pub sequence: i32,
    /// S5-02 stop reason code (LD, UL, CL, CU, ...).
    pub reason_code: String,
    /// S5-03 weight.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub weight: String,
    /// S5-04 weight unit.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub weight_unit: String,
    /// Stop location from the stop's N1 loop.
    #[serde(default)]
    pub location: Party,
    /// Appointments from DTM/G62.
    #[serde(default)]
    pub dates: Vec<DateTimeRef>,
    /// NTE notes.
    #[serde(default)]
    pub notes: Vec<String>,
}

/// N7 equipment details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    /// N7-01.
    pub initial: String,
    /// N7-02.
    pub number: String,
    /// N7-11 equipment description code.
    pub type_code: String,
    /// N7-15 length.
    pub length: String,
}

/// AT8/L3 totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    /// Total weight.
    pub weight: String,
    /// Weight unit or qualifier.
    pub weight_unit: String,
    /// Lading quantity.
    pub quantity: String,
    /// Volume.
    pub volume: String,
    /// Volume unit.
    pub volume_unit: String,
    /// L3-05 charge.
    pub charge: String,
}

/// L5 commodity line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commodity {
    /// L5-01.
    pub line_number: String,
    /// L5-02.
    pub description: String,
    /// L5-03.
    pub code: String,
    /// L5-04.
    pub code_qualifier: String,
    /// L5-05.
    pub packaging_code: String,
}

/// Typed 204 load tender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTender {
    /// ST control.
    pub control: Control,
    /// B2-02 carrier SCAC.
    pub carrier_scac: String,
    /// B2-04 shipment identification number.
    pub shipment_id: String,
    /// B2-06 method of payment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payment_method: String,
    /// B2A-01 transaction set purpose.
    pub action_code: String,
    /// L11 references in order.
    pub references: Vec<Reference>,
    /// Header level parties.
    pub parties: Vec<Party>,
    /// Stops in order.
    pub stops: Vec<StopOff>,
    /// Equipment.
    pub equipment: Equipment,
    /// Header notes.
    pub notes: Vec<String>,
    /// Totals.
    pub totals: Totals,
    /// Commodities.
    pub commodities: Vec<Commodity>,
}

impl LoadTender {
    /// First header party with the given entity code.
    pub fn party(&self, entity_code: &str) -> Option<&Party> {
        self.parties.iter().find(|p| p.entity_code == entity_code)
    }

    /// All L11 values for a qualifier, in order.
    pub fn references_for(&self, qualifier: &str) -> impl Iterator<Item = &str> {
        self.references
            .iter()
            .filter(move |r| r.qualifier == qualifier)
            .map(|r| r.value.as_str())
    }
}

/// Build a load tender from the segments of one transaction (or a whole
/// interchange, in which case the segments of every 204 accumulate).
pub fn build_from_segments(segments: &[Segment]) -> LoadTender {
    let mut lt = LoadTender::default();
    let mut in_stops = false;

    for seg in segments {
        match seg.tag.to_ascii_uppercase().as_str() {
            "ST" => {
                lt.control = Control {
                    set_id: seg.value(0).to_string(),
                    control_number: seg.value(1).to_string(),
                };
            }
            "B2" => {
                lt.carrier_scac = seg.value(1).to_string();
                lt.shipment_id = seg.value(3).to_string();
                lt.payment_method = seg.value(5).to_string();
            }
            "B2A" => lt.action_code = seg.value(0).to_string(),
            "L11" => lt.references.push(Reference {
                qualifier: seg.value(1).to_string(),
                value: seg.value(0).to_string(),
                description: seg.value(2).to_string(),
            }),
            "N1" => {
                let party = Party {
                    entity_code: seg.value(0).to_string(),
                    name: seg.value(1).to_string(),
                    id_qualifier: seg.value(2).to_string(),
                    id_code: seg.value(3).to_string(),
                    ..Party::default()
                };
                if in_stops {
                    if let Some(stop) = lt.stops.last_mut() {
                        stop.location = party;
                    }
                } else {
                    lt.parties.push(party);
                }
            }
            "N3" => {
                if let Some(party) = current_party(&mut lt, in_stops) {
                    party.address_lines = [seg.value(0), seg.value(1)]
                        .into_iter()
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect();
                }
            }
            "N4" => {
                if let Some(party) = current_party(&mut lt, in_stops) {
                    party.city = seg.value(0).to_string();
                    party.state = seg.value(1).to_string();
                    party.postal_code = seg.value(2).to_string();
                    party.country = seg.value(3).to_string();
                }
            }
            "G61" => {
                if let Some(party) = current_party(&mut lt, in_stops) {
                    party.contacts.push(Contact {
                        function_code: seg.value(0).to_string(),
                        name: seg.value(1).to_string(),
                        comm_qualifier: seg.value(2).to_string(),
                        comm_number: seg.value(3).to_string(),
                    });
                }
            }
            "S5" => {
                in_stops = true;
                lt.stops.push(StopOff {
                    sequence: seg.value(0).parse().unwrap_or(lt.stops.len() as i32 + 1),
                    reason_code: seg.value(1).to_string(),
                    weight: seg.value(2).to_string(),
                    weight_unit: seg.value(3).to_string(),
                    ..StopOff::default()
                });
            }
            "DTM" => {
                if let Some(stop) = lt.stops.last_mut() {
                    stop.dates.push(DateTimeRef {
                        qualifier: seg.value(0).to_string(),
                        date: seg.value(1).to_string(),
                        time: seg.value(2).to_string(),
                    });
                }
            }
            "G62" => {
                if let Some(stop) = lt.stops.last_mut() {
                    stop.dates.push(DateTimeRef {
                        qualifier: seg.value(0).to_string(),
                        date: seg.value(1).to_string(),
                        time: seg.value(3).to_string(),
                    });
                }
            }
            "N7" => {
                lt.equipment = Equipment {
                    initial: seg.value(0).to_string(),
                    number: seg.value(1).to_string(),
                    type_code: seg.value(10).to_string(),
                    length: seg.value(14).to_string(),
                };
            }
            "NTE" => {
                let note = seg.value(1).to_string();
                match lt.stops.last_mut() {
                    Some(stop) if in_stops => stop.notes.push(note),
                    _ => lt.notes.push(note),
                }
            }
            "AT8" => {
                lt.totals.weight_unit = seg.value(1).to_string();
                lt.totals.weight = seg.value(2).to_string();
                lt.totals.quantity = seg.value(3).to_string();
                lt.totals.volume_unit = seg.value(5).to_string();
                lt.totals.volume = seg.value(6).to_string();
            }
            "L3" => {
                if lt.totals.weight.is_empty() {
                    lt.totals.weight = seg.value(0).to_string();
                    lt.totals.weight_unit = seg.value(1).to_string();
                }
                lt.totals.charge = seg.value(4).to_string();
                if lt.totals.quantity.is_empty() {
                    lt.totals.quantity = seg.value(10).to_string();
                }
            }
            "L5" => lt.commodities.push(Commodity {
                line_number: seg.value(0).to_string(),
                description: seg.value(1).to_string(),
                code: seg.value(2).to_string(),
                code_qualifier: seg.value(3).to_string(),
                packaging_code: seg.value(4).to_string(),
            }),
            _ => {}
        }
    }
    lt
}

fn current_party(lt: &mut LoadTender, in_stops: bool) -> Option<&mut Party> {
    if in_stops {
        lt.stops.last_mut().map(|s| &mut s.location)
    } else {
        lt.parties.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(tag: &str, els: &[&str]) -> Segment {
        Segment::new(tag, els)
    }

    fn sample() -> Vec<Segment> {
        vec![
            seg("ST", &["204", "0001"]),
            seg("B2", &["", "ABCD", "", "SHIP123", "", "PP"]),
            seg("B2A", &["00"]),
            seg("L11", &["PO-9", "PO"]),
            seg("L11", &["BOL-1", "BM"]),
            seg("N1", &["BT", "Bill Co", "93", "BT01"]),
            seg("N3", &["1 Main St"]),
            seg("N4", &["Austin", "tx", "78701", "us"]),
            seg("NTE", &["GEN", "header note"]),
            seg("S5", &["1", "LD", "1000", "L"]),
            seg("DTM", &["133", "20240102", "0800"]),
            seg("N1", &["SH", "Shipper Inc"]),
            seg("N3", &["100 Dock Rd", "Suite 2"]),
            seg("N4", &["Dallas", "TX", "75001", "US"]),
            seg("G61", &["IC", "Pat", "TE", "5551234"]),
            seg("NTE", &["LOI", "call ahead"]),
            seg("S5", &["2", "UL"]),
            seg("G62", &["70", "20240103", "Y", "1400"]),
            seg("N1", &["CN", "Consignee LLC"]),
            seg("L5", &["1", "Widgets", "123", "N", "PLT"]),
            seg("AT8", &["G", "L", "1000", "10"]),
            seg("SE", &["21", "0001"]),
        ]
    }

    #[test]
    fn test_header_fields() {
        let lt = build_from_segments(&sample());
        assert_eq!(lt.control.set_id, "204");
        assert_eq!(lt.carrier_scac, "ABCD");
        assert_eq!(lt.shipment_id, "SHIP123");
        assert_eq!(lt.payment_method, "PP");
        assert_eq!(lt.action_code, "00");
        assert_eq!(lt.references.len(), 2);
        assert_eq!(lt.references[0].qualifier, "PO");
        assert_eq!(lt.references[0].value, "PO-9");
        assert_eq!(lt.references_for("BM").collect::<Vec<_>>(), vec!["BOL-1"]);
        assert_eq!(lt.notes, vec!["header note"]);
    }

    #[test]
    fn test_header_party_before_stops() {
        let lt = build_from_segments(&sample());
        assert_eq!(lt.parties.len(), 1);
        let bt = lt.party("BT").unwrap();
        assert_eq!(bt.name, "Bill Co");
        assert_eq!(bt.city, "Austin");
        assert_eq!(bt.state, "tx");
        assert_eq!(bt.id_code, "BT01");
    }

    #[test]
    fn test_stop_parties_and_dates() {
        let lt = build_from_segments(&sample());
        assert_eq!(lt.stops.len(), 2);

        let first = &lt.stops[0];
        assert_eq!(first.sequence, 1);
        assert_eq!(first.reason_code, "LD");
        assert_eq!(first.weight, "1000");
        assert_eq!(first.location.name, "Shipper Inc");
        assert_eq!(first.location.address_lines, vec!["100 Dock Rd", "Suite 2"]);
        assert_eq!(first.location.contacts[0].comm_number, "5551234");
        assert_eq!(first.dates[0].date, "20240102");
        assert_eq!(first.dates[0].time, "0800");
        assert_eq!(first.notes, vec!["call ahead"]);

        let second = &lt.stops[1];
        assert_eq!(second.location.entity_code, "CN");
        assert_eq!(second.dates[0].qualifier, "70");
        assert_eq!(second.dates[0].time, "1400");
    }

    #[test]
    fn test_totals_and_commodities() {
        let lt = build_from_segments(&sample());
        assert_eq!(lt.totals.weight, "1000");
        assert_eq!(lt.totals.quantity, "10");
        assert_eq!(lt.commodities[0].description, "Widgets");
    }

    #[test]
    fn test_unknown_segments_ignored() {
        let lt = build_from_segments(&[seg("ZZZ", &["x"]), seg("B2", &["", "SCAC"])]);
        assert_eq!(lt.carrier_scac, "SCAC");
        assert!(lt.stops.is_empty());
    }
}
