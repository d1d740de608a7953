use crate::errors::ScoringError;
use crate::models::*;
use crate::scoring_service::LeadScoringService;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: LeadScoringService,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreQuery {
    pub model_id: Option<String>,
    pub use_cache: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsQuery {
    pub model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScoreRequest {
    pub lead_ids: Vec<LeadId>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultQuery {
    /// Block up to this many milliseconds for the batch to finish.
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettingsRequest {
    pub ttl_ms: u64,
}

/// Longest a client may block on `waitMs`.
const MAX_BATCH_WAIT: Duration = Duration::from_secs(30);

/// Every `/api/v1` route. Rate limiting and body limits are layered on by
/// the binary.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/leads/:lead_id/score", get(score_lead))
        .route("/api/v1/leads/:lead_id/insights", get(lead_insights))
        .route("/api/v1/scores/batch", post(score_batch))
        .route("/api/v1/scores/batch/:request_id", get(batch_result))
        .route("/api/v1/scoring/statistics", get(scoring_statistics))
        .route("/api/v1/scoring/models", get(registered_models))
        .route("/api/v1/cache", delete(clear_all_caches))
        .route("/api/v1/cache/leads/:lead_id", delete(clear_lead_cache))
        .route("/api/v1/cache/models/:model_id", delete(clear_model_cache))
        .route("/api/v1/cache/settings", put(update_cache_settings))
}

/// Health check plus the API, with state attached.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

/// Health check endpoint.
///
/// Responds 503 while the service reports itself unhealthy so load
/// balancers can pull the instance.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthStatus>) {
    let health = state.service.health_status().await;
    let status = match health.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(health))
}

/// GET /api/v1/leads/:lead_id/score
pub async fn score_lead(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<LeadId>,
    Query(params): Query<ScoreQuery>,
) -> Result<Json<MLLeadScore>, ScoringError> {
    tracing::info!("GET /leads/{}/score - params: {:?}", lead_id, params);

    let score = state
        .service
        .score_lead(
            lead_id,
            params.model_id.as_deref(),
            params.use_cache.unwrap_or(true),
        )
        .await?;
    Ok(Json(score))
}

/// GET /api/v1/leads/:lead_id/insights
pub async fn lead_insights(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<LeadId>,
    Query(params): Query<InsightsQuery>,
) -> Result<Json<LeadInsights>, ScoringError> {
    tracing::info!("GET /leads/{}/insights", lead_id);

    let insights = state
        .service
        .get_lead_insights(lead_id, params.model_id.as_deref())
        .await?;
    Ok(Json(insights))
}

/// POST /api/v1/scores/batch
///
/// High-priority batches answer 200 with the finished result. Deferred
/// batches answer 202 with the accepted snapshot; poll
/// `GET /api/v1/scores/batch/:request_id` for the outcome.
pub async fn score_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchScoreRequest>,
) -> Result<(StatusCode, Json<BatchScoringResult>), ScoringError> {
    tracing::info!(
        "POST /scores/batch - {} lead(s), priority {:?}",
        request.lead_ids.len(),
        request.priority
    );

    let result = state
        .service
        .score_leads_batch(request.lead_ids, request.model_id, request.priority)
        .await?;

    let status = if result.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(result)))
}

/// GET /api/v1/scores/batch/:request_id
pub async fn batch_result(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Query(params): Query<BatchResultQuery>,
) -> Result<Json<BatchScoringResult>, ScoringError> {
    let result = match params.wait_ms {
        Some(ms) if ms > 0 => {
            let wait = Duration::from_millis(ms).min(MAX_BATCH_WAIT);
            state.service.wait_for_batch(request_id, wait).await
        }
        _ => state.service.batch_result(request_id).await,
    };

    result
        .map(Json)
        .ok_or_else(|| ScoringError::BatchNotFound(request_id.to_string()))
}

/// GET /api/v1/scoring/statistics
pub async fn scoring_statistics(
    State(state): State<Arc<AppState>>,
) -> Json<ScoringStatistics> {
    Json(state.service.scoring_statistics())
}

/// GET /api/v1/scoring/models
pub async fn registered_models(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(json!({
        "models": state.service.registered_models(),
        "defaultModelId": state.service.default_model_id(),
    }))
}

/// DELETE /api/v1/cache/leads/:lead_id
pub async fn clear_lead_cache(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<LeadId>,
) -> Json<serde_json::Value> {
    let removed = state.service.clear_lead_cache(lead_id).await;
    Json(json!({ "leadId": lead_id, "removed": removed }))
}

/// DELETE /api/v1/cache/models/:model_id
pub async fn clear_model_cache(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.service.clear_model_cache(&model_id).await;
    Json(json!({ "modelId": model_id, "removed": removed }))
}

/// DELETE /api/v1/cache
pub async fn clear_all_caches(State(state): State<Arc<AppState>>) -> StatusCode {
    state.service.clear_all_caches().await;
    StatusCode::NO_CONTENT
}

/// PUT /api/v1/cache/settings
pub async fn update_cache_settings(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CacheSettingsRequest>,
) -> Result<Json<serde_json::Value>, ScoringError> {
    state.service.update_cache_settings(request.ttl_ms)?;
    tracing::info!("Cache TTL updated to {}ms", request.ttl_ms);
    Ok(Json(json!({ "ttlMs": request.ttl_ms })))
}
