// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for trenova-edi integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use trenova_edi::x12::{detect_delimiters, parse_segments};
use trenova_edi::{Delimiters, Segment};

/// Absolute path of a file under `testdata/`.
pub fn testdata(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
}

/// Read and tokenize a fixture interchange.
pub fn load(name: &str) -> (Vec<Segment>, Delimiters) {
    let raw = std::fs::read(testdata(name)).expect("fixture should exist");
    let delims = detect_delimiters(&raw).expect("fixture should have an ISA header");
    let segments = parse_segments(&raw, delims).expect("fixture should tokenize");
    (segments, delims)
}
