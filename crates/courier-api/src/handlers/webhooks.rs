//! Provider webhook ingestion.
//!
//! The endpoint must always answer quickly and predictably: whatever
//! happens inside the pipeline, the provider gets a 200 with the
//! structured outcome. A non-2xx here would only make the provider retry a
//! webhook we have already dispositioned.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use tracing::instrument;

use crate::server::AppState;

/// Ingests one provider webhook.
#[instrument(name = "ingest_webhook", skip_all, fields(payload_bytes = body.len()))]
pub async fn ingest_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = header_str(&headers, "webhook-signature");
    let timestamp = header_str(&headers, "webhook-timestamp");

    let outcome = state.pipeline.process_webhook(&body, signature, timestamp).await;
    (StatusCode::OK, Json(outcome))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default()
}
