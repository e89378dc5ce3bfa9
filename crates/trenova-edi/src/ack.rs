// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! 997 functional and 999 implementation acknowledgments.
//!
//! Both carry a complete envelope addressed back to the sender: ISA and GS
//! sender/receiver are swapped, `GS-01` is `FA`, and control numbers are
//! derived from the generation time.

use chrono::{DateTime, Utc};

use crate::validation::{Issue, Severity};
use crate::x12::{Delimiters, Segment, TxBlock, split_transactions};

const ACK_ST_CONTROL: &str = "0001";

struct Envelope {
    isa: Vec<String>,
    gs: Vec<String>,
    isa_control: String,
    gs_control: String,
}

impl Envelope {
    fn new(original: &[Segment], delims: Delimiters, now: DateTime<Utc>) -> Self {
        let isa = original.iter().find(|s| s.is("ISA"));
        let gs = original.iter().find(|s| s.is("GS"));
        let isa_el = |i: usize| isa.map(|s| s.element(i).to_string()).unwrap_or_default();
        let gs_el = |i: usize| gs.map(|s| s.value(i).to_string()).unwrap_or_default();

        let ts = now.timestamp();
        let isa_control = format!("{:09}", ts.rem_euclid(1_000_000_000));
        let gs_control = format!("{}", ts.rem_euclid(100_000));

        let isa = vec![
            isa_el(0),
            isa_el(1),
            isa_el(2),
            isa_el(3),
            isa_el(6),
            isa_el(7),
            isa_el(4),
            isa_el(5),
            now.format("%y%m%d").to_string(),
            now.format("%H%M").to_string(),
            isa_el(10),
            isa_el(11),
            isa_control.clone(),
            "0".to_string(),
            isa_el(14),
            delims.component.to_string(),
        ];
        let gs = vec![
            "FA".to_string(),
            gs_el(2),
            gs_el(1),
            now.format("%Y%m%d").to_string(),
            now.format("%H%M").to_string(),
            gs_control.clone(),
            gs_el(6),
            gs_el(7),
        ];

        Self {
            isa,
            gs,
            isa_control,
            gs_control,
        }
    }
}

struct AckWriter {
    delims: Delimiters,
    out: String,
    st_count: usize,
}

impl AckWriter {
    fn new(delims: Delimiters) -> Self {
        Self {
            delims,
            out: String::new(),
            st_count: 0,
        }
    }

    fn segment<S: AsRef<str>>(&mut self, tag: &str, elements: &[S]) {
        self.out.push_str(tag);
        for element in elements {
            self.out.push(self.delims.element);
            self.out.push_str(element.as_ref());
        }
        self.out.push(self.delims.segment);
        self.st_count += 1;
    }

    fn open(&mut self, env: &Envelope, set_id: &str) {
        self.segment("ISA", &env.isa);
        self.segment("GS", &env.gs);
        self.st_count = 0;
        self.segment("ST", &[set_id, ACK_ST_CONTROL]);
    }

    fn close(mut self, env: &Envelope) -> String {
        let count = (self.st_count + 1).to_string();
        self.segment("SE", &[count.as_str(), ACK_ST_CONTROL]);
        self.segment("GE", &["1", env.gs_control.as_str()]);
        self.segment("IEA", &["1", env.isa_control.as_str()]);
        self.out
    }
}

fn group_header(original: &[Segment]) -> (String, String, String) {
    original
        .iter()
        .find(|s| s.is("GS"))
        .map(|gs| {
            (
                gs.value(0).to_string(),
                gs.value(5).to_string(),
                gs.value(7).to_string(),
            )
        })
        .unwrap_or_default()
}

fn issues_for<'a>(issues: &'a [Issue], block: &TxBlock) -> impl Iterator<Item = &'a Issue> {
    let start = block.start_index;
    let end = block.end_index();
    issues.iter().filter(move |issue| {
        !issue.is_envelope()
            && issue
                .segment_index
                .is_none_or(|index| index >= start && index <= end)
    })
}

/// Generate a 997 for an interchange using the current time.
pub fn generate_997(original: &[Segment], delims: Delimiters, issues: &[Issue]) -> String {
    generate_997_at(original, delims, issues, Utc::now())
}

/// Generate a 997 at a fixed time.
///
/// A transaction set is accepted (`AK5*A`) unless an error-severity issue
/// falls inside its `ST … SE` range or is not tied to any segment.
pub fn generate_997_at(
    original: &[Segment],
    delims: Delimiters,
    issues: &[Issue],
    now: DateTime<Utc>,
) -> String {
    let env = Envelope::new(original, delims, now);
    let (functional_id, group_control, _) = group_header(original);
    let blocks = split_transactions(original);

    let mut w = AckWriter::new(delims);
    w.open(&env, "997");
    w.segment("AK1", &[functional_id.as_str(), group_control.as_str()]);

    let mut accepted = 0usize;
    for block in &blocks {
        w.segment("AK2", &[block.set_id.as_str(), block.control.as_str()]);
        let ok = !issues_for(issues, block).any(|i| i.severity == Severity::Error);
        if ok {
            accepted += 1;
        }
        w.segment("AK5", &[if ok { "A" } else { "E" }]);
    }

    let total = blocks.len();
    let rejected = total - accepted;
    let code = group_code(accepted, rejected, "E");
    w.segment(
        "AK9",
        &[
            code.to_string(),
            total.to_string(),
            accepted.to_string(),
            rejected.to_string(),
        ],
    );
    w.close(&env)
}

/// Generate a 999 for an interchange using the current time.
///
/// `accepted[i]` tells whether `blocks[i]` passed validation.
pub fn generate_999(
    original: &[Segment],
    delims: Delimiters,
    blocks: &[TxBlock],
    accepted: &[bool],
) -> String {
    generate_999_at(original, delims, blocks, accepted, Utc::now())
}

/// Generate a 999 at a fixed time.
pub fn generate_999_at(
    original: &[Segment],
    delims: Delimiters,
    blocks: &[TxBlock],
    accepted: &[bool],
    now: DateTime<Utc>,
) -> String {
    let env = Envelope::new(original, delims, now);
    let (functional_id, group_control, version) = group_header(original);

    let mut w = AckWriter::new(delims);
    w.open(&env, "999");
    w.segment(
        "AK1",
        &[functional_id.as_str(), group_control.as_str(), version.as_str()],
    );

    let mut accepted_count = 0usize;
    for (i, block) in blocks.iter().enumerate() {
        let ok = accepted.get(i).copied().unwrap_or(false);
        if ok {
            accepted_count += 1;
        }
        w.segment(
            "AK2",
            &[block.set_id.as_str(), block.control.as_str(), version.as_str()],
        );
        w.segment("IK5", &[if ok { "A" } else { "R" }]);
    }

    let total = blocks.len();
    let rejected = total - accepted_count;
    let code = group_code(accepted_count, rejected, "P");
    w.segment(
        "AK9",
        &[
            code.to_string(),
            total.to_string(),
            total.to_string(),
            accepted_count.to_string(),
        ],
    );
    w.close(&env)
}

fn group_code(accepted: usize, rejected: usize, partial: &'static str) -> &'static str {
    if rejected == 0 {
        "A"
    } else if accepted == 0 {
        "R"
    } else {
        partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x12::{detect_delimiters, fixtures, parse_segments};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap()
    }

    fn parsed(body: &str) -> (Vec<Segment>, Delimiters) {
        let raw = fixtures::interchange(body);
        let delims = detect_delimiters(raw.as_bytes()).unwrap();
        (parse_segments(raw.as_bytes(), delims).unwrap(), delims)
    }

    fn lines(ack: &str) -> Vec<&str> {
        ack.split('~').filter(|s| !s.is_empty()).collect()
    }

    #[test]
    fn test_997_accepted() {
        let (segs, delims) = parsed("ST*204*0001~B2**S**ID~SE*3*0001~");
        let ack = generate_997_at(&segs, delims, &[], now());
        let l = lines(&ack);

        assert!(l[0].starts_with("ISA*00*"));
        assert!(l[0].contains("*ZZ*RECEIVER       *ZZ*SENDER         *240305*1407*"));
        assert!(l[0].ends_with("*0*P*>"));
        assert_eq!(l[1], format!("GS*FA*RECEIVER*SENDER*20240305*1407*{}*X*004010", now().timestamp() % 100_000));
        assert_eq!(l[2], "ST*997*0001");
        assert_eq!(l[3], "AK1*SM*1");
        assert_eq!(l[4], "AK2*204*0001");
        assert_eq!(l[5], "AK5*A");
        assert_eq!(l[6], "AK9*A*1*1*0");
        assert_eq!(l[7], "SE*6*0001");
        assert!(l[8].starts_with("GE*1*"));
        assert_eq!(l[9], format!("IEA*1*{:09}", now().timestamp() % 1_000_000_000));
    }

    #[test]
    fn test_997_partial() {
        let (segs, delims) =
            parsed("ST*204*0001~B2**S**ID~SE*3*0001~ST*204*0002~B2**S~SE*3*0002~");
        let issues = vec![Issue::error("B2.SHIPMENT_ID.MISSING", "empty").at(6, "B2")];
        let ack = generate_997_at(&segs, delims, &issues, now());
        let l = lines(&ack);
        assert_eq!(&l[4..9], &["AK2*204*0001", "AK5*A", "AK2*204*0002", "AK5*E", "AK9*E*2*1*1"]);
        assert_eq!(l[9], "SE*8*0001");
    }

    #[test]
    fn test_997_rejected_and_envelope_issues_ignored() {
        let (segs, delims) = parsed("ST*204*0001~SE*2*0001~");
        let envelope = vec![Issue::error("GE.COUNT", "bad").at(4, "GE")];
        let ack = generate_997_at(&segs, delims, &envelope, now());
        assert!(ack.contains("AK5*A~AK9*A*1*1*0~"));

        let unscoped = vec![Issue::error("SCHEMA.SEGMENT.MISSING", "N7")];
        let ack = generate_997_at(&segs, delims, &unscoped, now());
        assert!(ack.contains("AK5*E~AK9*R*1*0*1~"));
    }

    #[test]
    fn test_999_per_block() {
        let (segs, delims) =
            parsed("ST*204*0001~SE*2*0001~ST*204*0002~SE*2*0002~ST*990*0003~SE*2*0003~");
        let blocks = split_transactions(&segs);
        let ack = generate_999_at(&segs, delims, &blocks, &[true, false, true], now());
        let l = lines(&ack);
        assert_eq!(l[2], "ST*999*0001");
        assert_eq!(l[3], "AK1*SM*1*004010");
        assert_eq!(l[4], "AK2*204*0001*004010");
        assert_eq!(l[5], "IK5*A");
        assert_eq!(l[7], "IK5*R");
        assert_eq!(l[8], "AK2*990*0003*004010");
        assert_eq!(l[10], "AK9*P*3*3*2");
        assert_eq!(l[11], "SE*10*0001");
    }

    #[test]
    fn test_999_all_rejected() {
        let (segs, delims) = parsed("ST*204*0001~SE*2*0001~");
        let blocks = split_transactions(&segs);
        let ack = generate_999_at(&segs, delims, &blocks, &[false], now());
        assert!(ack.contains("AK9*R*1*1*0~"));
    }
}
