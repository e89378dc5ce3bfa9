// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store for suggestions, lanes, pattern configs and locations.
//!
//! The schema is embedded; call [`PostgresLaneStore::migrate`] once at
//! startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use trenova_core::TenantScope;

use super::{DedicatedLaneRepository, LocationRepository, PatternConfigRepository, SuggestionRepository};
use crate::config::{PatternConfig, PatternDetectionConfig};
use crate::error::{LaneError, Result};
use crate::model::{
    DedicatedLane, DedicatedLaneSuggestion, LaneKey, Location, SuggestionStatus,
};

/// PostgreSQL migrator with the lanes schema embedded.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

const SUGGESTION_COLUMNS: &str = "id, organization_id, business_unit_id, status, customer_id, \
    origin_location_id, destination_location_id, service_type_id, shipment_type_id, \
    trailer_type_id, tractor_type_id, confidence_score, frequency, avg_freight_charge, \
    total_freight_value, first_shipment_date, last_shipment_date, analysis_start_date, \
    analysis_end_date, suggested_name, pattern_details, expires_at, processed_by_id, \
    processed_at, created_dedicated_lane_id, created_at, updated_at";

const LANE_COLUMNS: &str = "id, organization_id, business_unit_id, name, status, customer_id, \
    origin_location_id, destination_location_id, service_type_id, shipment_type_id, \
    trailer_type_id, tractor_type_id, primary_worker_id, secondary_worker_id, auto_assign, \
    created_at, updated_at";

const CONFIG_COLUMNS: &str = "id, organization_id, business_unit_id, enabled, min_frequency, \
    analysis_window_days, min_confidence_score, suggestion_ttl_days, require_exact_match, \
    weight_recent_shipments, updated_at";

/// Same tenant and NULL-aware full key, parameters `$1..$9`.
const KEY_FILTER: &str = "organization_id = $1 AND business_unit_id = $2 \
    AND customer_id = $3 AND origin_location_id = $4 AND destination_location_id = $5 \
    AND service_type_id IS NOT DISTINCT FROM $6 AND shipment_type_id IS NOT DISTINCT FROM $7 \
    AND trailer_type_id IS NOT DISTINCT FROM $8 AND tractor_type_id IS NOT DISTINCT FROM $9";

/// PostgreSQL-backed lanes store.
#[derive(Clone)]
pub struct PostgresLaneStore {
    pool: PgPool,
}

impl PostgresLaneStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(PgPool::connect(database_url).await?))
    }

    /// Apply pending migrations. Already-applied migrations are skipped.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or replace a location.
    pub async fn upsert_location(&self, location: &Location) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO locations (id, organization_id, business_unit_id, code, name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id, organization_id, business_unit_id)
            DO UPDATE SET code = EXCLUDED.code, name = EXCLUDED.name
            "#,
        )
        .bind(&location.id)
        .bind(&location.organization_id)
        .bind(&location.business_unit_id)
        .bind(&location.code)
        .bind(&location.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct SuggestionRow {
    id: String,
    organization_id: String,
    business_unit_id: String,
    status: String,
    customer_id: String,
    origin_location_id: String,
    destination_location_id: String,
    service_type_id: Option<String>,
    shipment_type_id: Option<String>,
    trailer_type_id: Option<String>,
    tractor_type_id: Option<String>,
    confidence_score: Decimal,
    frequency: i64,
    avg_freight_charge: Option<Decimal>,
    total_freight_value: Option<Decimal>,
    first_shipment_date: DateTime<Utc>,
    last_shipment_date: DateTime<Utc>,
    analysis_start_date: DateTime<Utc>,
    analysis_end_date: DateTime<Utc>,
    suggested_name: String,
    pattern_details: Value,
    expires_at: DateTime<Utc>,
    processed_by_id: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_dedicated_lane_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SuggestionRow> for DedicatedLaneSuggestion {
    type Error = LaneError;

    fn try_from(row: SuggestionRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse().map_err(LaneError::CorruptRow)?,
            id: row.id,
            organization_id: row.organization_id,
            business_unit_id: row.business_unit_id,
            key: LaneKey {
                customer_id: row.customer_id,
                origin_location_id: row.origin_location_id,
                destination_location_id: row.destination_location_id,
                service_type_id: row.service_type_id,
                shipment_type_id: row.shipment_type_id,
                trailer_type_id: row.trailer_type_id,
                tractor_type_id: row.tractor_type_id,
            },
            confidence_score: row.confidence_score,
            frequency: row.frequency,
            avg_freight_charge: row.avg_freight_charge,
            total_freight_value: row.total_freight_value,
            first_shipment_date: row.first_shipment_date,
            last_shipment_date: row.last_shipment_date,
            analysis_start_date: row.analysis_start_date,
            analysis_end_date: row.analysis_end_date,
            suggested_name: row.suggested_name,
            pattern_details: row.pattern_details,
            expires_at: row.expires_at,
            processed_by_id: row.processed_by_id,
            processed_at: row.processed_at,
            created_dedicated_lane_id: row.created_dedicated_lane_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LaneRow {
    id: String,
    organization_id: String,
    business_unit_id: String,
    name: String,
    status: String,
    customer_id: String,
    origin_location_id: String,
    destination_location_id: String,
    service_type_id: Option<String>,
    shipment_type_id: Option<String>,
    trailer_type_id: Option<String>,
    tractor_type_id: Option<String>,
    primary_worker_id: String,
    secondary_worker_id: Option<String>,
    auto_assign: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LaneRow> for DedicatedLane {
    type Error = LaneError;

    fn try_from(row: LaneRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse().map_err(LaneError::CorruptRow)?,
            id: row.id,
            organization_id: row.organization_id,
            business_unit_id: row.business_unit_id,
            name: row.name,
            key: LaneKey {
                customer_id: row.customer_id,
                origin_location_id: row.origin_location_id,
                destination_location_id: row.destination_location_id,
                service_type_id: row.service_type_id,
                shipment_type_id: row.shipment_type_id,
                trailer_type_id: row.trailer_type_id,
                tractor_type_id: row.tractor_type_id,
            },
            primary_worker_id: row.primary_worker_id,
            secondary_worker_id: row.secondary_worker_id,
            auto_assign: row.auto_assign,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConfigRow {
    id: String,
    organization_id: String,
    business_unit_id: String,
    enabled: bool,
    min_frequency: i64,
    analysis_window_days: i64,
    min_confidence_score: Decimal,
    suggestion_ttl_days: i64,
    require_exact_match: bool,
    weight_recent_shipments: bool,
    updated_at: DateTime<Utc>,
}

impl From<ConfigRow> for PatternConfig {
    fn from(row: ConfigRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            business_unit_id: row.business_unit_id,
            enabled: row.enabled,
            detection: PatternDetectionConfig {
                min_frequency: row.min_frequency,
                analysis_window_days: row.analysis_window_days,
                min_confidence_score: row.min_confidence_score,
                suggestion_ttl_days: row.suggestion_ttl_days,
                require_exact_match: row.require_exact_match,
                weight_recent_shipments: row.weight_recent_shipments,
            },
            updated_at: row.updated_at,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ============================================================================
// Suggestions
// ============================================================================

#[async_trait]
impl SuggestionRepository for PostgresLaneStore {
    async fn create(&self, s: &DedicatedLaneSuggestion) -> Result<DedicatedLaneSuggestion> {
        let sql = format!(
            r#"
            INSERT INTO dedicated_lane_suggestions ({SUGGESTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
            RETURNING {SUGGESTION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SuggestionRow>(&sql)
            .bind(&s.id)
            .bind(&s.organization_id)
            .bind(&s.business_unit_id)
            .bind(s.status.as_str())
            .bind(&s.key.customer_id)
            .bind(&s.key.origin_location_id)
            .bind(&s.key.destination_location_id)
            .bind(&s.key.service_type_id)
            .bind(&s.key.shipment_type_id)
            .bind(&s.key.trailer_type_id)
            .bind(&s.key.tractor_type_id)
            .bind(s.confidence_score)
            .bind(s.frequency)
            .bind(s.avg_freight_charge)
            .bind(s.total_freight_value)
            .bind(s.first_shipment_date)
            .bind(s.last_shipment_date)
            .bind(s.analysis_start_date)
            .bind(s.analysis_end_date)
            .bind(&s.suggested_name)
            .bind(&s.pattern_details)
            .bind(s.expires_at)
            .bind(&s.processed_by_id)
            .bind(s.processed_at)
            .bind(&s.created_dedicated_lane_id)
            .bind(s.created_at)
            .bind(s.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    LaneError::DuplicatePattern(s.key.to_string())
                } else {
                    LaneError::from(e)
                }
            })?;
        row.try_into()
    }

    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<DedicatedLaneSuggestion> {
        let sql = format!(
            "SELECT {SUGGESTION_COLUMNS} FROM dedicated_lane_suggestions \
             WHERE id = $1 AND organization_id = $2 AND business_unit_id = $3"
        );
        sqlx::query_as::<_, SuggestionRow>(&sql)
            .bind(id)
            .bind(&scope.org_id)
            .bind(&scope.bu_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LaneError::not_found("suggestion", id))?
            .try_into()
    }

    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<SuggestionStatus>,
    ) -> Result<Vec<DedicatedLaneSuggestion>> {
        let sql = format!(
            "SELECT {SUGGESTION_COLUMNS} FROM dedicated_lane_suggestions \
             WHERE organization_id = $1 AND business_unit_id = $2 \
             AND ($3::text IS NULL OR status = $3) \
             ORDER BY created_at DESC, id"
        );
        sqlx::query_as::<_, SuggestionRow>(&sql)
            .bind(&scope.org_id)
            .bind(&scope.bu_id)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn update(&self, s: &DedicatedLaneSuggestion) -> Result<DedicatedLaneSuggestion> {
        let sql = format!(
            r#"
            UPDATE dedicated_lane_suggestions
            SET status = $4, suggested_name = $5, pattern_details = $6, processed_by_id = $7,
                processed_at = $8, created_dedicated_lane_id = $9, updated_at = NOW()
            WHERE id = $1 AND organization_id = $2 AND business_unit_id = $3
              AND status = 'Pending'
            RETURNING {SUGGESTION_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, SuggestionRow>(&sql)
            .bind(&s.id)
            .bind(&s.organization_id)
            .bind(&s.business_unit_id)
            .bind(s.status.as_str())
            .bind(&s.suggested_name)
            .bind(&s.pattern_details)
            .bind(&s.processed_by_id)
            .bind(s.processed_at)
            .bind(&s.created_dedicated_lane_id)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                let current = SuggestionRepository::get_by_id(self, &s.scope(), &s.id).await?;
                Err(LaneError::AlreadyProcessed {
                    id: s.id.clone(),
                    status: current.status,
                })
            }
        }
    }

    async fn find_pending_duplicate(
        &self,
        scope: &TenantScope,
        key: &LaneKey,
    ) -> Result<Option<DedicatedLaneSuggestion>> {
        let sql = format!(
            "SELECT {SUGGESTION_COLUMNS} FROM dedicated_lane_suggestions \
             WHERE {KEY_FILTER} AND status = 'Pending' LIMIT 1"
        );
        sqlx::query_as::<_, SuggestionRow>(&sql)
            .bind(&scope.org_id)
            .bind(&scope.bu_id)
            .bind(&key.customer_id)
            .bind(&key.origin_location_id)
            .bind(&key.destination_location_id)
            .bind(&key.service_type_id)
            .bind(&key.shipment_type_id)
            .bind(&key.trailer_type_id)
            .bind(&key.tractor_type_id)
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn expire_old_suggestions(
        &self,
        scope: Option<&TenantScope>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE dedicated_lane_suggestions
            SET status = 'Expired', updated_at = $1
            WHERE status = 'Pending' AND expires_at < $1
              AND ($2::text IS NULL OR organization_id = $2)
              AND ($3::text IS NULL OR business_unit_id = $3)
            "#,
        )
        .bind(now)
        .bind(scope.map(|s| s.org_id.as_str()))
        .bind(scope.map(|s| s.bu_id.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Dedicated Lanes
// ============================================================================

#[async_trait]
impl DedicatedLaneRepository for PostgresLaneStore {
    async fn create(&self, lane: &DedicatedLane) -> Result<DedicatedLane> {
        let sql = format!(
            r#"
            INSERT INTO dedicated_lanes ({LANE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {LANE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, LaneRow>(&sql)
            .bind(&lane.id)
            .bind(&lane.organization_id)
            .bind(&lane.business_unit_id)
            .bind(&lane.name)
            .bind(lane.status.as_str())
            .bind(&lane.key.customer_id)
            .bind(&lane.key.origin_location_id)
            .bind(&lane.key.destination_location_id)
            .bind(&lane.key.service_type_id)
            .bind(&lane.key.shipment_type_id)
            .bind(&lane.key.trailer_type_id)
            .bind(&lane.key.tractor_type_id)
            .bind(&lane.primary_worker_id)
            .bind(&lane.secondary_worker_id)
            .bind(lane.auto_assign)
            .bind(lane.created_at)
            .bind(lane.updated_at)
            .fetch_one(&self.pool)
            .await?
            .try_into()
    }

    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<DedicatedLane> {
        let sql = format!(
            "SELECT {LANE_COLUMNS} FROM dedicated_lanes \
             WHERE id = $1 AND organization_id = $2 AND business_unit_id = $3"
        );
        sqlx::query_as::<_, LaneRow>(&sql)
            .bind(id)
            .bind(&scope.org_id)
            .bind(&scope.bu_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LaneError::not_found("dedicated lane", id))?
            .try_into()
    }

    async fn list(&self, scope: &TenantScope) -> Result<Vec<DedicatedLane>> {
        let sql = format!(
            "SELECT {LANE_COLUMNS} FROM dedicated_lanes \
             WHERE organization_id = $1 AND business_unit_id = $2 ORDER BY name"
        );
        sqlx::query_as::<_, LaneRow>(&sql)
            .bind(&scope.org_id)
            .bind(&scope.bu_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn find_by_key(&self, scope: &TenantScope, key: &LaneKey) -> Result<Option<DedicatedLane>> {
        let sql = format!(
            "SELECT {LANE_COLUMNS} FROM dedicated_lanes \
             WHERE {KEY_FILTER} AND status = 'Active' ORDER BY created_at LIMIT 1"
        );
        sqlx::query_as::<_, LaneRow>(&sql)
            .bind(&scope.org_id)
            .bind(&scope.bu_id)
            .bind(&key.customer_id)
            .bind(&key.origin_location_id)
            .bind(&key.destination_location_id)
            .bind(&key.service_type_id)
            .bind(&key.shipment_type_id)
            .bind(&key.trailer_type_id)
            .bind(&key.tractor_type_id)
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }
}

// ============================================================================
// Pattern Configs & Locations
// ============================================================================

#[async_trait]
impl PatternConfigRepository for PostgresLaneStore {
    async fn get_all(&self) -> Result<Vec<PatternConfig>> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM pattern_configs ORDER BY organization_id, business_unit_id"
        );
        let rows = sqlx::query_as::<_, ConfigRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_by_org(&self, scope: &TenantScope) -> Result<PatternConfig> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM pattern_configs \
             WHERE organization_id = $1 AND business_unit_id = $2"
        );
        sqlx::query_as::<_, ConfigRow>(&sql)
            .bind(&scope.org_id)
            .bind(&scope.bu_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| LaneError::not_found("pattern config", scope.to_string()))
    }

    async fn upsert(&self, config: &PatternConfig) -> Result<PatternConfig> {
        let d = &config.detection;
        let sql = format!(
            r#"
            INSERT INTO pattern_configs ({CONFIG_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (organization_id, business_unit_id) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                min_frequency = EXCLUDED.min_frequency,
                analysis_window_days = EXCLUDED.analysis_window_days,
                min_confidence_score = EXCLUDED.min_confidence_score,
                suggestion_ttl_days = EXCLUDED.suggestion_ttl_days,
                require_exact_match = EXCLUDED.require_exact_match,
                weight_recent_shipments = EXCLUDED.weight_recent_shipments,
                updated_at = NOW()
            RETURNING {CONFIG_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ConfigRow>(&sql)
            .bind(&config.id)
            .bind(&config.organization_id)
            .bind(&config.business_unit_id)
            .bind(config.enabled)
            .bind(d.min_frequency)
            .bind(d.analysis_window_days)
            .bind(d.min_confidence_score)
            .bind(d.suggestion_ttl_days)
            .bind(d.require_exact_match)
            .bind(d.weight_recent_shipments)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }
}

#[async_trait]
impl LocationRepository for PostgresLaneStore {
    async fn get_by_id(&self, scope: &TenantScope, id: &str) -> Result<Location> {
        sqlx::query_as::<_, (String, String, String, String, String)>(
            r#"
            SELECT id, organization_id, business_unit_id, code, name
            FROM locations
            WHERE id = $1 AND organization_id = $2 AND business_unit_id = $3
            "#,
        )
        .bind(id)
        .bind(&scope.org_id)
        .bind(&scope.bu_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|(id, organization_id, business_unit_id, code, name)| Location {
            id,
            organization_id,
            business_unit_id,
            code,
            name,
        })
        .ok_or_else(|| LaneError::not_found("location", id))
    }
}
