// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in table handlers.

/// `shipments` table handler.
pub mod shipments;

pub use shipments::{SHIPMENTS, ShipmentRecord, ShipmentsHandler};
