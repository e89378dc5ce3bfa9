// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! X12 EDI command line tool
//!
//! Parses an X12 interchange and prints JSON: raw segments, a typed 204
//! load tender, or generic shipments. Optionally validates and emits a
//! 997/999 acknowledgment.
//!
//! Usage:
//!
//! ```text
//! edi-cli [OPTIONS] <path-to-edi>
//! ```
//!
//! Example:
//!
//! ```text
//! edi-cli --format shipment --multi ndjson --validate --profile partners/acme.json inbound/204.edi
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use trenova_edi::ack::{generate_997, generate_999};
use trenova_edi::mapper::{Options, Shipment, to_shipment_with_options};
use trenova_edi::tx204::{LoadTender, build_from_segments};
use trenova_edi::validation::{
    RuleSchema, default_profile_for_version, has_error, load_schema, validate_204_with_profile,
    validate_transaction, validate_with_schema,
};
use trenova_edi::x12::{detect_delimiters, extract_version, parse_segments, split_transactions};
use trenova_edi::{
    DEFAULT_4010_SCHEMA, Delimiters, Issue, LOAD_TENDER_SET_ID, PartnerConfig, Profile, Segment,
    TxBlock,
};

fn print_usage() {
    eprintln!(
        r#"Usage: edi-cli [OPTIONS] <path-to-edi>

Parse an X12 EDI file (e.g. 204) and print JSON.

OPTIONS:
    --format <fmt>          segments|204|shipment (default: segments)
    --pretty[=bool]         Pretty print JSON (default: true)
    --validate              Run 204 validation and include issues in output
    --lenient               Lenient validation (content findings become warnings)
    --multi <mode>          With --format shipment: off|ndjson|array (default: off)
    --fail-on-error         Exit 1 when validation errors are found
    --ack                   Emit 997 (004010) or 999 (005xxx/006xxx) with --validate
    --ack-json              With --ack: print {{ack, output, issues}} JSON
    --schema <path>         JSON rule schema
    --profile <path>        Partner profile (schema, delimiters, mapper options)
    --delims <e,c,s[,r]>    Override delimiters
    --element <c>           Override element separator
    --component <c>         Override component separator
    --segment <c>           Override segment terminator
    --repetition <c>        Override repetition separator
    --help                  Show this help message

EXIT CODES:
    0    Success
    1    Read, delimiter or parse failure; validation errors with --fail-on-error
    2    Usage error, unknown --format or --multi

EXAMPLES:
    # Typed load tender with validation issues
    edi-cli --format 204 --validate sample.edi

    # One shipment per line for every 204 in the file
    edi-cli --format shipment --multi ndjson sample.edi

    # 997 acknowledgment
    edi-cli --validate --ack sample.edi
"#
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    path: PathBuf,
    pretty: bool,
    format: String,
    validate: bool,
    lenient: bool,
    multi: String,
    fail_on_error: bool,
    ack: bool,
    ack_json: bool,
    schema: Option<PathBuf>,
    profile: Option<PathBuf>,
    delims: Option<String>,
    element: Option<char>,
    component: Option<char>,
    segment: Option<char>,
    repetition: Option<char>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            pretty: true,
            format: "segments".to_string(),
            validate: false,
            lenient: false,
            multi: "off".to_string(),
            fail_on_error: false,
            ack: false,
            ack_json: false,
            schema: None,
            profile: None,
            delims: None,
            element: None,
            component: None,
            segment: None,
            repetition: None,
        }
    }
}

#[derive(Debug)]
enum Command {
    Help,
    Run(Box<Args>),
}

fn parse_bool(flag: &str, value: &str) -> Result<bool, String> {
    match value {
        "true" | "TRUE" | "True" | "t" | "1" => Ok(true),
        "false" | "FALSE" | "False" | "f" | "0" => Ok(false),
        _ => Err(format!("invalid boolean value '{}' for --{}", value, flag)),
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn parse_args_from_vec(argv: &[String]) -> Result<Command, String> {
    let mut args = Args::default();
    let mut path: Option<PathBuf> = None;

    let mut i = 0;
    while i < argv.len() {
        let arg = &argv[i];
        let Some(flag) = arg
            .strip_prefix("--")
            .or_else(|| arg.strip_prefix('-'))
            .filter(|f| !f.is_empty())
        else {
            if path.is_some() {
                return Err(format!("Unexpected argument: {}", arg));
            }
            path = Some(PathBuf::from(arg));
            i += 1;
            continue;
        };
        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (flag, None),
        };

        match name {
            "help" | "h" => return Ok(Command::Help),
            "pretty" | "validate" | "lenient" | "fail-on-error" | "ack" | "ack-json" => {
                let on = match inline {
                    Some(value) => parse_bool(name, value)?,
                    None => true,
                };
                match name {
                    "pretty" => args.pretty = on,
                    "validate" => args.validate = on,
                    "lenient" => args.lenient = on,
                    "fail-on-error" => args.fail_on_error = on,
                    "ack" => args.ack = on,
                    _ => args.ack_json = on,
                }
            }
            "format" | "multi" | "schema" | "profile" | "delims" | "element" | "component"
            | "segment" | "repetition" => {
                let value = match inline {
                    Some(value) => value.to_string(),
                    None => {
                        i += 1;
                        argv.get(i)
                            .ok_or_else(|| format!("--{} requires a value", name))?
                            .clone()
                    }
                };
                match name {
                    "format" => args.format = value,
                    "multi" => args.multi = value,
                    "schema" => args.schema = non_empty(value).map(PathBuf::from),
                    "profile" => args.profile = non_empty(value).map(PathBuf::from),
                    "delims" => args.delims = non_empty(value),
                    "element" => args.element = value.chars().next(),
                    "component" => args.component = value.chars().next(),
                    "segment" => args.segment = value.chars().next(),
                    _ => args.repetition = value.chars().next(),
                }
            }
            _ => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }

    args.path = path.ok_or("missing path to EDI file")?;
    Ok(Command::Run(Box::new(args)))
}

/// Collected process output, printed by `main`.
#[derive(Debug, Default)]
struct Outcome {
    stdout: Vec<String>,
    stderr: Vec<String>,
    code: u8,
}

impl Outcome {
    fn print(&mut self, line: impl Into<String>) {
        self.stdout.push(line.into());
    }

    fn warn(&mut self, line: impl Into<String>) {
        self.stderr.push(line.into());
    }

    fn emit<T: Serialize + ?Sized>(&mut self, value: &T, pretty: bool) {
        let encoded = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        match encoded {
            Ok(json) => self.print(json),
            Err(e) => {
                self.warn(format!("json encode error: {}", e));
                self.code = 1;
            }
        }
    }

    fn exit(mut self, code: u8, message: impl Into<String>) -> Self {
        self.warn(message);
        self.code = code;
        self
    }
}

#[derive(Serialize)]
struct SegmentsOutput<'a> {
    delimiters: Delimiters,
    segments: &'a [Segment],
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<&'a [Issue]>,
}

#[derive(Serialize)]
struct LoadTenderOutput<'a> {
    load_tender: &'a LoadTender,
    issues: &'a [Issue],
}

#[derive(Serialize)]
struct ShipmentRecord<'a> {
    shipment: &'a Shipment,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<&'a [Issue]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    segments: Option<&'a [Segment]>,
}

fn apply_overrides(args: &Args, delims: &mut Delimiters) {
    if let Some(spec) = &args.delims {
        let parts: Vec<Option<char>> = spec.split(',').map(|p| p.chars().next()).collect();
        if let Some(Some(c)) = parts.first() {
            delims.element = *c;
        }
        if let Some(Some(c)) = parts.get(1) {
            delims.component = *c;
        }
        if let Some(Some(c)) = parts.get(2) {
            delims.segment = *c;
        }
        if let Some(Some(c)) = parts.get(3) {
            delims.repetition = Some(*c);
        }
    }
    if let Some(c) = args.element {
        delims.element = c;
    }
    if let Some(c) = args.component {
        delims.component = c;
    }
    if let Some(c) = args.segment {
        delims.segment = c;
    }
    if let Some(c) = args.repetition {
        delims.repetition = Some(c);
    }
}

fn resolve_schema(
    args: &Args,
    partner: Option<&PartnerConfig>,
    version: &str,
    out: &mut Outcome,
) -> Option<RuleSchema> {
    let path = args
        .schema
        .clone()
        .or_else(|| {
            partner
                .filter(|p| !p.schema_path.is_empty())
                .map(|p| PathBuf::from(&p.schema_path))
        })
        .or_else(|| {
            (version == "004010" && Path::new(DEFAULT_4010_SCHEMA).exists())
                .then(|| PathBuf::from(DEFAULT_4010_SCHEMA))
        })?;

    match load_schema(&path) {
        Ok(schema) => Some(schema),
        Err(e) => {
            out.warn(format!("schema load error: {}", e));
            None
        }
    }
}

struct Session<'a> {
    args: &'a Args,
    partner: Option<PartnerConfig>,
    delims: Delimiters,
    segments: Vec<Segment>,
    version: String,
    schema: Option<RuleSchema>,
}

impl Session<'_> {
    fn profile(&self) -> Profile {
        let mut profile = default_profile_for_version(&self.version);
        if let Some(partner) = &self.partner {
            profile = partner.apply_validation(profile);
        }
        if self.args.lenient {
            profile = profile.relaxed();
        }
        profile
    }

    fn validate_interchange(&self) -> Vec<Issue> {
        let mut issues = validate_204_with_profile(&self.segments, &self.profile());
        if let Some(schema) = &self.schema {
            issues.extend(validate_with_schema(&self.segments, schema));
        }
        issues
    }

    fn validate_block(&self, block: &TxBlock) -> Vec<Issue> {
        validate_transaction(&block.segments, &self.profile(), self.schema.as_ref())
    }

    fn acknowledgment(&self, issues: &[Issue]) -> Option<String> {
        if !self.args.ack {
            return None;
        }
        if self.version == "004010" {
            return Some(generate_997(&self.segments, self.delims, issues));
        }
        if self.version.starts_with("005") || self.version.starts_with("006") {
            let blocks = split_transactions(&self.segments);
            let accepted: Vec<bool> = blocks
                .iter()
                .map(|b| b.set_id != LOAD_TENDER_SET_ID || !has_error(&self.validate_block(b)))
                .collect();
            return Some(generate_999(&self.segments, self.delims, &blocks, &accepted));
        }
        None
    }

    fn include_segments(&self) -> bool {
        self.partner.as_ref().is_some_and(|p| p.include_segments)
    }

    fn mapper_options(&self) -> Options {
        self.partner
            .as_ref()
            .map(PartnerConfig::to_mapper_options)
            .unwrap_or_default()
    }

    fn emit_ack<T: Serialize>(
        &self,
        out: &mut Outcome,
        ack: String,
        key: &str,
        body: &T,
        issues: &[Issue],
    ) {
        if !self.args.ack_json {
            out.print(ack);
            return;
        }
        let encoded = serde_json::to_value(body).and_then(|b| Ok((b, serde_json::to_value(issues)?)));
        match encoded {
            Ok((body, issues)) => {
                let mut doc = Map::new();
                doc.insert("ack".to_string(), Value::String(ack));
                doc.insert(key.to_string(), body);
                doc.insert("issues".to_string(), issues);
                out.emit(&doc, self.args.pretty);
            }
            Err(e) => {
                out.warn(format!("json encode error: {}", e));
                out.code = 1;
            }
        }
    }

    fn finish(&self, mut out: Outcome, issues: &[Issue]) -> Outcome {
        if self.args.fail_on_error && has_error(issues) && out.code == 0 {
            out.code = 1;
        }
        out
    }

    fn segments_output(&self, mut out: Outcome) -> Outcome {
        let body = SegmentsOutput {
            delimiters: self.delims,
            segments: &self.segments,
            issues: None,
        };
        if !self.args.validate {
            out.emit(&body, self.args.pretty);
            return out;
        }

        let issues = self.validate_interchange();
        match self.acknowledgment(&issues) {
            Some(ack) => self.emit_ack(&mut out, ack, "output", &body, &issues),
            None => out.emit(
                &SegmentsOutput {
                    issues: Some(&issues),
                    ..body
                },
                self.args.pretty,
            ),
        }
        self.finish(out, &issues)
    }

    fn load_tender_output(&self, mut out: Outcome) -> Outcome {
        let lt = build_from_segments(&self.segments);
        if !self.args.validate {
            out.emit(&lt, self.args.pretty);
            return out;
        }

        let issues = self.validate_interchange();
        match self.acknowledgment(&issues) {
            Some(ack) => self.emit_ack(&mut out, ack, "load_tender", &lt, &issues),
            None => out.emit(
                &LoadTenderOutput {
                    load_tender: &lt,
                    issues: &issues,
                },
                self.args.pretty,
            ),
        }
        self.finish(out, &issues)
    }

    fn shipment_output(&self, out: Outcome) -> Outcome {
        let opts = self.mapper_options();
        match self.args.multi.as_str() {
            "off" => self.single_shipment(out, &opts),
            "ndjson" => self.multi_shipments(out, &opts, false),
            "array" => self.multi_shipments(out, &opts, true),
            other => out.exit(2, format!("invalid --multi: {}", other)),
        }
    }

    fn single_shipment(&self, mut out: Outcome, opts: &Options) -> Outcome {
        let shipment = to_shipment_with_options(&build_from_segments(&self.segments), opts);
        let issues = self.args.validate.then(|| self.validate_interchange());
        let segments = self.include_segments().then_some(self.segments.as_slice());

        if issues.is_none() && segments.is_none() {
            out.emit(&shipment, self.args.pretty);
            return out;
        }
        out.emit(
            &ShipmentRecord {
                shipment: &shipment,
                issues: issues.as_deref(),
                segments,
            },
            self.args.pretty,
        );
        self.finish(out, issues.as_deref().unwrap_or_default())
    }

    fn multi_shipments(&self, mut out: Outcome, opts: &Options, as_array: bool) -> Outcome {
        let blocks: Vec<TxBlock> = split_transactions(&self.segments)
            .into_iter()
            .filter(|b| b.set_id == LOAD_TENDER_SET_ID)
            .collect();
        if blocks.is_empty() {
            out.warn("no 204 transactions found");
            return out;
        }

        let mut any_error = false;
        let mut records = Vec::with_capacity(blocks.len());
        for block in &blocks {
            let shipment = to_shipment_with_options(&build_from_segments(&block.segments), opts);
            let issues = self.args.validate.then(|| self.validate_block(block));
            any_error |= issues.as_deref().is_some_and(has_error);
            records.push((shipment, issues));
        }

        if as_array {
            let items: Vec<ShipmentRecord<'_>> = records
                .iter()
                .map(|(shipment, issues)| ShipmentRecord {
                    shipment,
                    issues: issues.as_deref(),
                    segments: None,
                })
                .collect();
            out.emit(&items, self.args.pretty);
        } else {
            let with_segments = self.include_segments();
            for ((shipment, issues), block) in records.iter().zip(&blocks) {
                out.emit(
                    &ShipmentRecord {
                        shipment,
                        issues: issues.as_deref(),
                        segments: with_segments.then_some(block.segments.as_slice()),
                    },
                    false,
                );
            }
        }

        if self.args.fail_on_error && any_error {
            out.code = 1;
        }
        out
    }
}

fn execute(args: &Args, raw: &[u8]) -> Outcome {
    let mut out = Outcome::default();

    let mut delims = match detect_delimiters(raw) {
        Ok(delims) => delims,
        Err(e) => return out.exit(1, format!("delimiter detect error: {}", e)),
    };

    let mut partner = None;
    if let Some(path) = &args.profile {
        match PartnerConfig::load(path) {
            Ok(config) => partner = Some(config),
            Err(e) => out.warn(format!("profile load error: {}", e)),
        }
    }
    if let Some(config) = &partner
        && let Err(e) = config.apply_delimiters(&mut delims)
    {
        out.warn(format!("profile load error: {}", e));
    }
    apply_overrides(args, &mut delims);

    let segments = match parse_segments(raw, delims) {
        Ok(segments) => segments,
        Err(e) => return out.exit(1, format!("parse error: {}", e)),
    };
    let version = extract_version(&segments);
    let schema = if args.validate {
        resolve_schema(args, partner.as_ref(), &version, &mut out)
    } else {
        None
    };

    let session = Session {
        args,
        partner,
        delims,
        segments,
        version,
        schema,
    };
    match args.format.as_str() {
        "segments" => session.segments_output(out),
        "204" => session.load_tender_output(out),
        "shipment" => session.shipment_output(out),
        other => out.exit(2, format!("unknown format: {}", other)),
    }
}

fn run(args: &Args) -> Outcome {
    match std::fs::read(&args.path) {
        Ok(raw) => execute(args, &raw),
        Err(e) => Outcome::default().exit(1, format!("read error: {}", e)),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args_from_vec(&argv) {
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run(args)) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(2);
        }
    };

    let outcome = run(&args);
    for line in &outcome.stderr {
        eprintln!("{}", line);
    }
    for line in &outcome.stdout {
        println!("{}", line);
    }
    ExitCode::from(outcome.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    fn fixture(name: &str) -> String {
        format!("{}/testdata/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    fn run_with(a: &[&str]) -> Outcome {
        match parse_args_from_vec(&args(a)).unwrap() {
            Command::Run(parsed) => run(&parsed),
            Command::Help => panic!("expected run command"),
        }
    }

    fn json(line: &str) -> Value {
        serde_json::from_str(line).unwrap()
    }

    // ========================================================================
    // Argument parsing
    // ========================================================================

    #[test]
    fn test_parse_defaults() {
        let Command::Run(parsed) = parse_args_from_vec(&args(&["in.edi"])).unwrap() else {
            panic!("expected run command");
        };
        assert_eq!(parsed.path, PathBuf::from("in.edi"));
        assert!(parsed.pretty);
        assert_eq!(parsed.format, "segments");
        assert_eq!(parsed.multi, "off");
        assert!(!parsed.validate);
    }

    #[test]
    fn test_parse_flags() {
        let Command::Run(parsed) = parse_args_from_vec(&args(&[
            "--format",
            "shipment",
            "--multi=ndjson",
            "--pretty=false",
            "-validate",
            "--fail-on-error",
            "--schema",
            "rules.json",
            "--delims",
            "|,^,\n",
            "--repetition",
            "~",
            "in.edi",
        ]))
        .unwrap() else {
            panic!("expected run command");
        };
        assert_eq!(parsed.format, "shipment");
        assert_eq!(parsed.multi, "ndjson");
        assert!(!parsed.pretty);
        assert!(parsed.validate);
        assert!(parsed.fail_on_error);
        assert_eq!(parsed.schema, Some(PathBuf::from("rules.json")));
        assert_eq!(parsed.delims.as_deref(), Some("|,^,\n"));
        assert_eq!(parsed.repetition, Some('~'));
    }

    #[test]
    fn test_parse_errors() {
        assert!(
            parse_args_from_vec(&args(&["--format"]))
                .unwrap_err()
                .contains("--format requires a value")
        );
        assert!(
            parse_args_from_vec(&args(&["--bogus", "in.edi"]))
                .unwrap_err()
                .contains("Unknown argument")
        );
        assert!(
            parse_args_from_vec(&args(&["--pretty=maybe", "in.edi"]))
                .unwrap_err()
                .contains("invalid boolean")
        );
        assert!(parse_args_from_vec(&args(&[])).unwrap_err().contains("missing path"));
        assert!(matches!(
            parse_args_from_vec(&args(&["--help"])).unwrap(),
            Command::Help
        ));
    }

    #[test]
    fn test_apply_overrides() {
        let parsed = Args {
            delims: Some("|,^,\n,!".to_string()),
            component: Some(':'),
            ..Args::default()
        };
        let mut delims = Delimiters::default();
        apply_overrides(&parsed, &mut delims);
        assert_eq!(delims.element, '|');
        assert_eq!(delims.component, ':');
        assert_eq!(delims.segment, '\n');
        assert_eq!(delims.repetition, Some('!'));
    }

    // ========================================================================
    // Failure exits
    // ========================================================================

    #[test]
    fn test_read_error_exits_1() {
        let outcome = run_with(&["/nonexistent/input.edi"]);
        assert_eq!(outcome.code, 1);
        assert!(outcome.stderr[0].starts_with("read error:"));
    }

    #[test]
    fn test_delimiter_error_exits_1() {
        let outcome = execute(&Args::default(), b"GS*SM*A*B~");
        assert_eq!(outcome.code, 1);
        assert!(outcome.stderr[0].starts_with("delimiter detect error:"));
    }

    #[test]
    fn test_unknown_format_exits_2() {
        let sample = fixture("sample1.edi");
        let outcome = run_with(&["--format", "xml", &sample]);
        assert_eq!(outcome.code, 2);
        assert_eq!(outcome.stderr, vec!["unknown format: xml"]);

        let outcome = run_with(&["--format", "shipment", "--multi", "csv", &sample]);
        assert_eq!(outcome.code, 2);
        assert_eq!(outcome.stderr, vec!["invalid --multi: csv"]);
    }

    #[test]
    fn test_profile_load_error_continues() {
        let sample = fixture("sample1.edi");
        let outcome = run_with(&["--profile", "/nonexistent/profile.json", &sample]);
        assert_eq!(outcome.code, 0);
        assert!(outcome.stderr[0].starts_with("profile load error:"));
        assert_eq!(outcome.stdout.len(), 1);
    }

    // ========================================================================
    // Output shapes
    // ========================================================================

    #[test]
    fn test_segments_output() {
        let outcome = run_with(&["--pretty=false", &fixture("sample1.edi")]);
        assert_eq!(outcome.code, 0);
        let doc = json(&outcome.stdout[0]);
        assert_eq!(doc["delimiters"]["element"], "*");
        assert_eq!(doc["segments"][0]["tag"], "ISA");
        assert!(doc.get("issues").is_none());
    }

    #[test]
    fn test_segments_validate_clean_sample() {
        let outcome = run_with(&["--validate", "--fail-on-error", &fixture("sample1.edi")]);
        assert_eq!(outcome.code, 0, "stderr: {:?}", outcome.stderr);
        let doc = json(&outcome.stdout[0]);
        assert_eq!(doc["issues"], serde_json::json!([]));
    }

    #[test]
    fn test_load_tender_output() {
        let outcome = run_with(&["--format", "204", &fixture("sample1.edi")]);
        let doc = json(&outcome.stdout[0]);
        assert_eq!(doc["carrier_scac"], "TRNV");
        assert_eq!(doc["shipment_id"], "SHP12345");

        let outcome = run_with(&["--format", "204", "--validate", &fixture("sample1.edi")]);
        let doc = json(&outcome.stdout[0]);
        assert_eq!(doc["load_tender"]["shipment_id"], "SHP12345");
        assert!(doc["issues"].is_array());
    }

    #[test]
    fn test_shipment_iso_datetime_from_profile() {
        let outcome = run_with(&[
            "--format",
            "shipment",
            "--profile",
            &fixture("profiles/iso-utc.json"),
            &fixture("sample1.edi"),
        ]);
        assert_eq!(outcome.code, 0, "stderr: {:?}", outcome.stderr);
        let doc = json(&outcome.stdout[0]);
        let appt = &doc["stops"][0]["appointments"][0];
        assert_eq!(appt["date"], "20240102");
        assert_eq!(appt["time"], "0800");
        assert_eq!(appt["datetime"], "2024-01-02T08:00:00Z");
    }

    #[test]
    fn test_shipment_include_segments_profile() {
        let outcome = run_with(&[
            "--format",
            "shipment",
            "--profile",
            &fixture("profiles/lenient-segments.json"),
            &fixture("sample1.edi"),
        ]);
        let doc = json(&outcome.stdout[0]);
        assert_eq!(doc["shipment"]["shipment_id"], "SHP12345");
        assert!(doc["segments"].is_array());
        assert!(doc.get("issues").is_none());
    }

    #[test]
    fn test_multi_ndjson_with_validation() {
        let multi = fixture("multi_tx.edi");
        let outcome = run_with(&["--format", "shipment", "--multi", "ndjson", "--validate", &multi]);
        assert_eq!(outcome.code, 0);
        assert_eq!(outcome.stdout.len(), 2);

        let first = json(&outcome.stdout[0]);
        assert_eq!(first["shipment"]["shipment_id"], "LOAD1001");
        assert_eq!(first["issues"], serde_json::json!([]));

        let second = json(&outcome.stdout[1]);
        let codes: Vec<&str> = second["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["B2.SHIPMENT_ID.MISSING"]);

        let outcome = run_with(&[
            "--format",
            "shipment",
            "--multi",
            "ndjson",
            "--validate",
            "--fail-on-error",
            &multi,
        ]);
        assert_eq!(outcome.code, 1);
    }

    #[test]
    fn test_multi_array() {
        let outcome = run_with(&[
            "--format",
            "shipment",
            "--multi",
            "array",
            &fixture("multi_tx.edi"),
        ]);
        let doc = json(&outcome.stdout.join("\n"));
        let items = doc.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].get("issues").is_none());
        assert_eq!(items[1]["shipment"]["stops"][1]["type"], "delivery");
    }

    // ========================================================================
    // Acknowledgments
    // ========================================================================

    #[test]
    fn test_ack_997() {
        let outcome = run_with(&["--validate", "--ack", &fixture("sample1.edi")]);
        let ack = &outcome.stdout[0];
        assert!(ack.starts_with("ISA*00*"));
        assert!(ack.contains("~ST*997*0001~AK1*SM*101~AK2*204*0001~AK5*A~AK9*A*1*1*0~"));
    }

    #[test]
    fn test_ack_json() {
        let outcome = run_with(&[
            "--format",
            "204",
            "--validate",
            "--ack",
            "--ack-json",
            &fixture("sample1.edi"),
        ]);
        let doc = json(&outcome.stdout[0]);
        assert!(doc["ack"].as_str().unwrap().contains("ST*997"));
        assert_eq!(doc["load_tender"]["carrier_scac"], "TRNV");
        assert!(doc["issues"].is_array());
    }

    #[test]
    fn test_ack_999_per_transaction() {
        let outcome = run_with(&["--validate", "--ack", &fixture("sample_5010.edi")]);
        let ack = &outcome.stdout[0];
        assert!(ack.contains("AK1*SM*303*005010~"));
        assert!(ack.contains("AK2*204*0001*005010~IK5*A~"));
        assert!(ack.contains("AK2*204*0002*005010~IK5*R~"));
        assert!(ack.contains("AK2*990*0003*005010~IK5*A~"));
        assert!(ack.contains("AK9*P*3*3*2~"));
    }
}
