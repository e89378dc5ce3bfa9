// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Grouping and scoring of historical shipments.
//!
//! Everything here is pure: shipments in, scored patterns out. Persistence
//! and exclusion happen in [`PatternService`](crate::PatternService).
//!
//! # Confidence
//!
//! | Component | Contribution |
//! |-----------|--------------|
//! | Frequency | `min(0.4, frequency / 10)` |
//! | Recency (if weighted) | last shipment ≤7 d: +0.3, ≤30 d: +0.2, ≤60 d: +0.1 |
//! | Consistency | average gap ≤30 d: +0.2, ≤60 d: +0.1 |
//! | Value | total freight > 10 000: +0.1 |
//!
//! The sum is clamped to 1.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};
use trenova_core::shipment::Shipment;

use crate::config::PatternDetectionConfig;
use crate::model::{LaneKey, PatternMatch};

const SECONDS_PER_DAY: i64 = 86_400;

/// Key of a shipment that can take part in pattern detection.
///
/// Requires a customer, service and shipment types, at least one move, and
/// locations on the first stop of the first move and the last stop of the
/// last move.
pub fn qualifying_key(shipment: &Shipment) -> Option<LaneKey> {
    if shipment.customer_id.is_empty()
        || shipment.moves.is_empty()
        || shipment.service_type_id.is_none()
        || shipment.shipment_type_id.is_none()
    {
        return None;
    }
    LaneKey::for_shipment(shipment).filter(|key| {
        !key.origin_location_id.is_empty() && !key.destination_location_id.is_empty()
    })
}

/// Group shipments by pattern key and score each group.
///
/// Groups keep the order in which their first shipment was seen.
pub fn group_shipments(
    shipments: &[Shipment],
    config: &PatternDetectionConfig,
    now: DateTime<Utc>,
) -> Vec<PatternMatch> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut patterns: Vec<PatternMatch> = Vec::new();
    let mut invalid = 0usize;

    for shipment in shipments {
        let Some(key) = qualifying_key(shipment) else {
            invalid += 1;
            debug!(shipment_id = %shipment.id, "Shipment lacks pattern fields, skipping");
            continue;
        };

        let fingerprint = key.fingerprint(&shipment.organization_id, config.require_exact_match);
        let slot = *index.entry(fingerprint).or_insert_with(|| {
            patterns.push(PatternMatch {
                organization_id: shipment.organization_id.clone(),
                business_unit_id: shipment.business_unit_id.clone(),
                key,
                frequency: 0,
                shipment_ids: Vec::new(),
                first_shipment_date: shipment.created_at,
                last_shipment_date: shipment.created_at,
                total_freight_value: None,
                avg_freight_charge: None,
                confidence: Decimal::ZERO,
            });
            patterns.len() - 1
        });

        let pattern = &mut patterns[slot];
        pattern.frequency += 1;
        pattern.shipment_ids.push(shipment.id.clone());
        pattern.first_shipment_date = pattern.first_shipment_date.min(shipment.created_at);
        pattern.last_shipment_date = pattern.last_shipment_date.max(shipment.created_at);
        if let Some(charge) = shipment.freight_charge_amount {
            pattern.total_freight_value = Some(pattern.total_freight_value.unwrap_or_default() + charge);
        }
    }

    for pattern in &mut patterns {
        pattern.avg_freight_charge = pattern
            .total_freight_value
            .map(|total| total / Decimal::from(pattern.frequency));
        pattern.confidence = confidence_score(pattern, config, now);
    }

    info!(
        shipments = shipments.len(),
        invalid = invalid,
        patterns = patterns.len(),
        "Grouped shipments into patterns"
    );

    patterns
}

/// Confidence of a pattern in `[0, 1]`.
pub fn confidence_score(
    pattern: &PatternMatch,
    config: &PatternDetectionConfig,
    now: DateTime<Utc>,
) -> Decimal {
    let mut score = (Decimal::from(pattern.frequency) / Decimal::TEN).min(tenths(4));

    if config.weight_recent_shipments {
        let days_since_last = (now - pattern.last_shipment_date).num_seconds() / SECONDS_PER_DAY;
        score += match days_since_last {
            d if d <= 7 => tenths(3),
            d if d <= 30 => tenths(2),
            d if d <= 60 => tenths(1),
            _ => Decimal::ZERO,
        };
    }

    let span = (pattern.last_shipment_date - pattern.first_shipment_date).num_seconds();
    if span > 0 && pattern.frequency > 1 {
        let avg_days_between = span / (SECONDS_PER_DAY * (pattern.frequency - 1));
        if avg_days_between <= 30 {
            score += tenths(2);
        } else if avg_days_between <= 60 {
            score += tenths(1);
        }
    }

    if pattern
        .total_freight_value
        .is_some_and(|total| total > Decimal::from(10_000))
    {
        score += tenths(1);
    }

    score.min(Decimal::ONE)
}

/// Keep patterns at or above both thresholds, highest confidence first.
pub fn filter_patterns(
    patterns: Vec<PatternMatch>,
    config: &PatternDetectionConfig,
) -> Vec<PatternMatch> {
    let mut qualified: Vec<PatternMatch> = patterns
        .into_iter()
        .filter(|p| {
            p.frequency >= config.min_frequency && p.confidence >= config.min_confidence_score
        })
        .collect();
    qualified.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    qualified
}

fn tenths(n: i64) -> Decimal {
    Decimal::new(n, 1)
}
