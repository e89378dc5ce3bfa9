// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handlers for the built-in job types.
//!
//! | Job type | Handler |
//! |----------|---------|
//! | `pattern:analyze` | [`PatternAnalysisHandler`] |
//! | `pattern:expire_suggestions` | [`ExpireSuggestionsHandler`] |
//! | `shipment:delay` | [`DelayShipmentHandler`] |
//! | `shipment:duplicate` | [`DuplicateShipmentHandler`] |
//! | `email:send` | [`SendEmailHandler`] |
//! | `email:process_queue` | [`ProcessEmailQueueHandler`] |

mod email;
mod pattern;
mod shipment;

pub use email::{ProcessEmailQueueHandler, SendEmailHandler};
pub use pattern::{ExpireSuggestionsHandler, PatternAnalysisHandler};
pub use shipment::{DelayShipmentHandler, DuplicateShipmentHandler};
