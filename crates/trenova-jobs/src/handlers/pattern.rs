// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::info;
use trenova_lanes::{
    PatternAnalysisRequest, PatternDetectionConfig, PatternService, SuggestionService,
};

use crate::error::{JobError, Result};
use crate::handler::PayloadHandler;
use crate::payload::{ExpireSuggestionsPayload, PatternAnalysisPayload};
use crate::task::Task;
use crate::types::JobType;

/// Runs lane pattern detection.
///
/// A payload with tenant ids analyzes that tenant only; otherwise every
/// enabled organization config is analyzed. `minFrequency` replaces the
/// stored thresholds with the standard preset at that frequency.
pub struct PatternAnalysisHandler {
    patterns: Arc<PatternService>,
}

impl PatternAnalysisHandler {
    /// Create a handler over the pattern service.
    pub fn new(patterns: Arc<PatternService>) -> Self {
        Self { patterns }
    }
}

fn timestamp(job_type: JobType, field: &str, secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| JobError::invalid_payload(job_type, format!("{field} is out of range")))
}

pub(crate) fn analysis_request(
    payload: &PatternAnalysisPayload,
    now: DateTime<Utc>,
) -> Result<PatternAnalysisRequest> {
    let job_type = JobType::AnalyzePatterns;
    let window = PatternDetectionConfig::standard().analysis_window_days;

    let end = match payload.end_date {
        Some(secs) => timestamp(job_type, "endDate", secs)?,
        None => now,
    };
    let start = match payload.start_date {
        Some(secs) => timestamp(job_type, "startDate", secs)?,
        None => end - Duration::days(window),
    };
    if start > end {
        return Err(JobError::invalid_payload(job_type, "startDate is after endDate"));
    }

    let mut request = PatternAnalysisRequest::trailing(window, end);
    request.start = start;
    if let Some(scope) = payload.base.scope() {
        request = request.for_tenant(scope);
    }
    if let Some(customer) = &payload.customer_id {
        request = request.for_customer(customer.clone());
    }
    if let Some(min_frequency) = payload.min_frequency {
        request = request.with_config(PatternDetectionConfig {
            min_frequency,
            ..PatternDetectionConfig::standard()
        });
    }
    Ok(request)
}

#[async_trait]
impl PayloadHandler for PatternAnalysisHandler {
    type Payload = PatternAnalysisPayload;
    const JOB_TYPE: JobType = JobType::AnalyzePatterns;

    async fn handle(&self, payload: Self::Payload, task: &Task) -> Result<String> {
        let request = analysis_request(&payload, Utc::now())?;
        info!(
            job_id = %task.job_id(),
            organization_id = ?payload.base.organization_id,
            trigger_reason = %payload.trigger_reason,
            start = %request.start,
            end = %request.end,
            "Running pattern analysis job"
        );

        let result = self.patterns.analyze_patterns(&request).await?;
        Ok(format!(
            "Analyzed {} organizations: {} suggestions created, {} skipped",
            result.organizations_processed, result.suggestions_created, result.suggestions_skipped
        ))
    }
}

/// Moves pending suggestions past their TTL to Expired.
pub struct ExpireSuggestionsHandler {
    suggestions: Arc<SuggestionService>,
}

impl ExpireSuggestionsHandler {
    /// Create a handler over the suggestion service.
    pub fn new(suggestions: Arc<SuggestionService>) -> Self {
        Self { suggestions }
    }
}

#[async_trait]
impl PayloadHandler for ExpireSuggestionsHandler {
    type Payload = ExpireSuggestionsPayload;
    const JOB_TYPE: JobType = JobType::ExpireOldSuggestions;

    async fn handle(&self, payload: Self::Payload, task: &Task) -> Result<String> {
        let scope = payload.base.scope();
        let expired = self
            .suggestions
            .expire_old_suggestions(scope.as_ref(), Utc::now())
            .await?;
        info!(
            job_id = %task.job_id(),
            expired,
            batch_size = payload.batch_size,
            "Suggestion expiry sweep finished"
        );
        Ok(format!("Expired {expired} suggestions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::JobBasePayload;
    use chrono::TimeZone;
    use trenova_core::TenantScope;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_system_payload_uses_trailing_window() {
        let payload = PatternAnalysisPayload {
            base: JobBasePayload::system(),
            trigger_reason: "scheduled".into(),
            ..Default::default()
        };
        let request = analysis_request(&payload, now()).unwrap();
        assert_eq!(request.end, now());
        assert_eq!(request.start, now() - Duration::days(90));
        assert!(request.scope.is_none());
        assert!(request.config.is_none());
        assert!(request.exclude_existing);
    }

    #[test]
    fn test_tenant_payload_with_overrides() {
        let scope = TenantScope::new("org_a", "bu_a", "usr_1");
        let start = now() - Duration::days(10);
        let payload = PatternAnalysisPayload {
            base: JobBasePayload::for_tenant(&scope),
            min_frequency: Some(5),
            customer_id: Some("cus_1".into()),
            start_date: Some(start.timestamp()),
            end_date: Some(now().timestamp()),
            trigger_reason: "manual".into(),
        };
        let request = analysis_request(&payload, Utc::now()).unwrap();
        assert_eq!(request.start, start);
        assert_eq!(request.end, now());
        assert_eq!(request.scope, Some(scope));
        assert_eq!(request.customer_id.as_deref(), Some("cus_1"));
        let config = request.config.unwrap();
        assert_eq!(config.min_frequency, 5);
        assert_eq!(config.analysis_window_days, 90);
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let payload = PatternAnalysisPayload {
            start_date: Some(now().timestamp()),
            end_date: Some((now() - Duration::days(1)).timestamp()),
            ..Default::default()
        };
        let err = analysis_request(&payload, now()).unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload { .. }));
    }
}
