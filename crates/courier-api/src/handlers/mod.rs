//! HTTP request handlers.

pub mod webhooks;

use axum::{extract::Path, extract::State, http::StatusCode, response::IntoResponse, Json};
use courier_core::CampaignId;
use uuid::Uuid;

use crate::server::AppState;

/// Liveness probe.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Aggregate queue counts plus the current breaker state.
pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.stats().await {
        Ok(snapshot) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": error.to_string() })),
        ),
    }
}

/// Aggregated email metrics for one campaign.
pub async fn campaign_metrics(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.pipeline.email_metrics(CampaignId::from(campaign_id)).await {
        Ok(metrics) => (StatusCode::OK, Json(serde_json::json!(metrics))),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": error.to_string() })),
        ),
    }
}
