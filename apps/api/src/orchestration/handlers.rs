//! Axum route handlers for the AI API.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;
use crate::models::analysis::{AnalysisResult, MatchResult};
use crate::orchestration::registry::ProviderHealth;
use crate::orchestration::service::CostAnalytics;
use crate::orchestration::usage::DateRange;
use crate::state::AppState;

/// Window used by the cost endpoint when no dates are given.
const DEFAULT_ANALYTICS_DAYS: i64 = 7;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub content: String,
    #[serde(default)]
    pub file_name: String,
    /// Pin the call to one provider, bypassing failover.
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub analysis: AnalysisResult,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub resume_text: String,
    pub job_description: String,
    pub options: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub match_result: MatchResult,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionsRequest {
    pub resume_text: String,
    pub job_description: Option<String>,
    pub options: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ProviderHealthResponse {
    pub providers: BTreeMap<String, ProviderHealth>,
}

#[derive(Debug, Deserialize)]
pub struct CostQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn require_text(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/ai/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    require_text(&request.content, "content")?;

    let analysis = state
        .ai
        .analyze_resume(
            &request.content,
            &request.file_name,
            request.provider.as_deref(),
        )
        .await?;

    Ok(Json(AnalyzeResponse { analysis }))
}

/// POST /api/v1/ai/match
pub async fn handle_match(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    require_text(&request.resume_text, "resume_text")?;
    require_text(&request.job_description, "job_description")?;

    let match_result = state
        .ai
        .match_job_description(&request.resume_text, &request.job_description, request.options)
        .await?;

    Ok(Json(MatchResponse { match_result }))
}

/// POST /api/v1/ai/suggestions
pub async fn handle_suggestions(
    State(state): State<AppState>,
    Json(request): Json<SuggestionsRequest>,
) -> Result<Json<SuggestionsResponse>, AppError> {
    require_text(&request.resume_text, "resume_text")?;
    // A blank job description means "none".
    let job_description = request
        .job_description
        .as_deref()
        .filter(|jd| !jd.trim().is_empty());

    let suggestions = state
        .ai
        .generate_suggestions(&request.resume_text, job_description, request.options)
        .await?;

    Ok(Json(SuggestionsResponse { suggestions }))
}

/// GET /api/v1/ai/providers/health
pub async fn handle_provider_health(
    State(state): State<AppState>,
) -> Json<ProviderHealthResponse> {
    Json(ProviderHealthResponse {
        providers: state.ai.provider_health(),
    })
}

/// POST /api/v1/ai/providers/health/reset
///
/// Marks every provider healthy and returns the resulting health map.
pub async fn handle_reset_provider_health(
    State(state): State<AppState>,
) -> Json<ProviderHealthResponse> {
    state.ai.reset_provider_health();
    Json(ProviderHealthResponse {
        providers: state.ai.provider_health(),
    })
}

/// GET /api/v1/ai/analytics/costs?from=YYYY-MM-DD&to=YYYY-MM-DD
///
/// Missing bounds default to a 7-day window ending today (or ending at `to`).
pub async fn handle_cost_analytics(
    State(state): State<AppState>,
    Query(query): Query<CostQuery>,
) -> Result<Json<CostAnalytics>, AppError> {
    let to = query.to.unwrap_or_else(|| Utc::now().date_naive());
    let from = match query.from {
        Some(from) => from,
        None => to
            .checked_sub_signed(Duration::days(DEFAULT_ANALYTICS_DAYS - 1))
            .ok_or_else(|| AppError::Validation(format!("to ({to}) is out of range")))?,
    };

    let range =
        DateRange::new(from, to, state.ai.retention_days()).map_err(AppError::Validation)?;
    let analytics = state.ai.cost_analytics(range).await?;

    Ok(Json(analytics))
}
