// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trenova EDI - X12 204 load tender pipeline
//!
//! Turns raw X12 interchanges into typed 204 load tenders and generic
//! shipment DTOs, validates them against partner profiles and JSON rule
//! schemas, and produces 997/999 acknowledgments.
//!
//! # Pipeline
//!
//! ```text
//!  raw bytes
//!     │ detect_delimiters (ISA fixed width)
//!     ▼
//!  Delimiters ──► parse_segments ──► Vec<Segment>
//!                                        │
//!            ┌───────────────────────────┼──────────────────────────┐
//!            ▼                           ▼                          ▼
//!   split_transactions         build_from_segments        validate_204_with_profile
//!   (ST … SE blocks)             (LoadTender)              + validate_with_schema
//!            │                           │                          │
//!            │                           ▼                          ▼
//!            │                 to_shipment_with_options          Vec<Issue>
//!            │                     (Shipment DTO)                   │
//!            └──────────────────────────────────────────────────────┤
//!                                                                   ▼
//!                                                      generate_997 / generate_999
//! ```
//!
//! The mapper is tolerant and never fails on missing data; the validator is
//! the only place contract rules are enforced. A [`PartnerConfig`] may tune
//! either side independently.
//!
//! # Modules
//!
//! - [`x12`]: Delimiters, segments and transaction blocks
//! - [`tx204`]: Typed 204 load tender
//! - [`mapper`]: Load tender to shipment DTO
//! - [`validation`]: Profiles, issues and JSON rule schemas
//! - [`ack`]: 997/999 generation
//! - [`profile`]: Partner profiles
//! - [`error`]: Error type

#![deny(missing_docs)]

/// 997/999 acknowledgment generation.
pub mod ack;

/// Error type for EDI processing.
pub mod error;

/// Typed 204 to shipment DTO mapping.
pub mod mapper;

/// Partner profiles and the profile manager.
pub mod profile;

/// Typed 204 load tender model.
pub mod tx204;

/// Profile and rule schema validation.
pub mod validation;

/// X12 tokenizer primitives.
pub mod x12;

pub use error::{EdiError, Result};
pub use profile::{PartnerConfig, ProfileManager};
pub use validation::{Issue, Profile, Severity};
pub use x12::{Delimiters, Segment, TxBlock};

/// Set ID of the load tender transaction.
pub const LOAD_TENDER_SET_ID: &str = "204";

/// Rule schema applied to 004010 interchanges when none is configured.
pub const DEFAULT_4010_SCHEMA: &str = "testdata/schema/generic-204-4010.json";
