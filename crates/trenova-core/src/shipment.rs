// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shipment, move and stop model.
//!
//! Only the fields the backend subsystems read are modelled here. Amounts use
//! [`Decimal`] so revenue thresholds compare exactly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShipmentStatus {
    /// Created, nothing assigned.
    New,
    /// Some moves assigned.
    PartiallyAssigned,
    /// All moves assigned.
    Assigned,
    /// On the road.
    InTransit,
    /// Past a planned stop time without completion.
    Delayed,
    /// Some moves completed.
    PartiallyCompleted,
    /// All moves completed.
    Completed,
    /// Invoiced.
    Billed,
    /// Canceled.
    Canceled,
}

impl ShipmentStatus {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::PartiallyAssigned => "PartiallyAssigned",
            Self::Assigned => "Assigned",
            Self::InTransit => "InTransit",
            Self::Delayed => "Delayed",
            Self::PartiallyCompleted => "PartiallyCompleted",
            Self::Completed => "Completed",
            Self::Billed => "Billed",
            Self::Canceled => "Canceled",
        }
    }

    /// Statuses that count towards lane pattern detection.
    pub fn is_pattern_eligible(&self) -> bool {
        matches!(self, Self::Completed | Self::Billed)
    }

    /// Statuses whose stops can still run late.
    pub fn can_be_delayed(&self) -> bool {
        matches!(
            self,
            Self::New | Self::PartiallyAssigned | Self::Assigned | Self::InTransit
        )
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(Self::New),
            "PartiallyAssigned" => Ok(Self::PartiallyAssigned),
            "Assigned" => Ok(Self::Assigned),
            "InTransit" => Ok(Self::InTransit),
            "Delayed" => Ok(Self::Delayed),
            "PartiallyCompleted" => Ok(Self::PartiallyCompleted),
            "Completed" => Ok(Self::Completed),
            "Billed" => Ok(Self::Billed),
            "Canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown shipment status: {}", other)),
        }
    }
}

/// Pickup or delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopType {
    /// Freight picked up.
    Pickup,
    /// Freight delivered.
    Delivery,
}

/// One stop of a move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    /// Stop ID.
    pub id: String,
    /// Position within the move.
    pub sequence: i32,
    /// Pickup or delivery.
    pub stop_type: StopType,
    /// Location ID.
    pub location_id: String,
    /// Planned arrival.
    pub planned_arrival: Option<DateTime<Utc>>,
    /// Planned departure.
    pub planned_departure: Option<DateTime<Utc>>,
    /// Actual arrival.
    pub actual_arrival: Option<DateTime<Utc>>,
    /// Actual departure.
    pub actual_departure: Option<DateTime<Utc>>,
}

/// A leg of a shipment handled by one worker assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentMove {
    /// Move ID.
    pub id: String,
    /// Position within the shipment.
    pub sequence: i32,
    /// Stops in sequence order.
    #[serde(default)]
    pub stops: Vec<Stop>,
}

/// Shipment with the fields the backend needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    /// Shipment ID.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Owning business unit.
    pub business_unit_id: String,
    /// Lifecycle status.
    pub status: ShipmentStatus,
    /// PRO number.
    #[serde(default)]
    pub pro_number: String,
    /// Bill of lading.
    #[serde(default)]
    pub bol: String,
    /// Customer ID.
    pub customer_id: String,
    /// Service type.
    pub service_type_id: Option<String>,
    /// Shipment type.
    pub shipment_type_id: Option<String>,
    /// Tractor type.
    pub tractor_type_id: Option<String>,
    /// Trailer type.
    pub trailer_type_id: Option<String>,
    /// User who owns the shipment.
    pub owner_id: Option<String>,
    /// Freight charge.
    pub freight_charge_amount: Option<Decimal>,
    /// Total charge.
    pub total_charge_amount: Option<Decimal>,
    /// Moves in sequence order.
    #[serde(default)]
    pub moves: Vec<ShipmentMove>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    /// Origin and destination location IDs.
    ///
    /// Origin is the first stop of the first move; destination is the last
    /// stop of the last move. A single move with a single stop yields an
    /// origin only. No moves, or a first move without stops, yields nothing.
    pub fn origin_destination(&self) -> (Option<&str>, Option<&str>) {
        let Some(first_move) = self.moves.first() else {
            return (None, None);
        };
        let Some(origin) = first_move.stops.first() else {
            return (None, None);
        };

        if self.moves.len() == 1 && first_move.stops.len() == 1 {
            return (Some(origin.location_id.as_str()), None);
        }

        let destination = self
            .moves
            .last()
            .and_then(|m| m.stops.last())
            .map(|s| s.location_id.as_str());

        (Some(origin.location_id.as_str()), destination)
    }

    /// Move IDs in sequence order.
    pub fn move_ids(&self) -> Vec<&str> {
        self.moves.iter().map(|m| m.id.as_str()).collect()
    }

    /// Whether any stop is past its planned arrival without an actual arrival.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.moves.iter().flat_map(|m| m.stops.iter()).any(|s| {
            s.actual_arrival.is_none() && s.planned_arrival.is_some_and(|planned| planned < now)
        })
    }
}
