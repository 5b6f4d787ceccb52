//! Router construction and shared application state.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use courier_delivery::SendQueue;
use courier_pipeline::WebhookPipeline;
use tower_http::trace::TraceLayer;

use crate::handlers;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Webhook ingestion pipeline.
    pub pipeline: Arc<WebhookPipeline>,
    /// Send queue, for stats.
    pub queue: Arc<SendQueue>,
}

/// Builds the service router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/webhooks/email", post(handlers::webhooks::ingest_webhook))
        .route("/queue/stats", get(handlers::queue_stats))
        .route("/campaigns/:campaign_id/metrics", get(handlers::campaign_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::Utc;
    use courier_core::{
        storage::memory::{
            MemoryEventStore, MemoryLeadStore, MemoryQueueStore, MemoryStatusHistoryStore,
        },
        Lead, LeadId, LeadStatus, LeadStore,
    };
    use courier_delivery::{
        transport::{mock::MockTransport, NormalizedEvent},
        CircuitBreaker, CircuitConfig, QueueConfig, SendQueue,
    };
    use courier_leads::StatusTracker;
    use courier_pipeline::{PipelineConfig, WebhookPipeline};
    use tower::ServiceExt;

    use super::*;

    async fn test_state() -> (AppState, Arc<MockTransport>, Arc<MemoryLeadStore>) {
        let transport = Arc::new(MockTransport::new());
        let queue_store = Arc::new(MemoryQueueStore::new());
        let event_store = Arc::new(MemoryEventStore::new());
        let lead_store = Arc::new(MemoryLeadStore::new());
        let history = Arc::new(MemoryStatusHistoryStore::new());

        let breaker = Arc::new(CircuitBreaker::new("provider", CircuitConfig::default()));
        let queue = Arc::new(SendQueue::new(
            queue_store,
            transport.clone(),
            breaker,
            QueueConfig::default(),
        ));
        let tracker = Arc::new(StatusTracker::new(lead_store.clone(), history));
        let pipeline = Arc::new(WebhookPipeline::new(
            transport.clone(),
            event_store,
            tracker,
            queue.clone(),
            PipelineConfig::default(),
        ));

        (AppState { pipeline, queue }, transport, lead_store)
    }

    #[tokio::test]
    async fn health_endpoint_answers() {
        let (state, _transport, _leads) = test_state().await;
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_endpoint_always_returns_200_with_an_outcome() {
        let (state, transport, leads) = test_state().await;

        let lead = Lead::new(LeadId::new(), "lead@example.com");
        let lead_id = lead.id;
        let mut emailed = lead;
        emailed.status = LeadStatus::Emailed;
        leads.upsert(emailed).await.unwrap();

        transport.script_webhook(Ok(NormalizedEvent {
            event_type: "email.complained".to_string(),
            message_id: "msg-1".to_string(),
            recipient: "lead@example.com".to_string(),
            occurred_at: Utc::now(),
            tags: vec![format!("lead-{lead_id}")],
            metadata: HashMap::new(),
            bounce: None,
            reply: None,
            click_url: None,
        }));

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/email")
                    .header("webhook-signature", "sig")
                    .header("webhook-timestamp", "0")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let outcome: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(outcome["success"], true);
        assert_eq!(outcome["status_updated"], true);
        assert_eq!(outcome["event_type"], "complained");

        assert_eq!(leads.get(lead_id).await.unwrap().unwrap().status, LeadStatus::Declined);
    }

    #[tokio::test]
    async fn webhook_failures_still_answer_200() {
        let (state, _transport, _leads) = test_state().await;
        // Nothing scripted: the mock reports a malformed webhook.

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/email")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let outcome: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(outcome["success"], false);
        assert!(outcome["error"].as_str().unwrap().contains("webhook"));
    }

    #[tokio::test]
    async fn queue_stats_endpoint_reports_breaker_state() {
        let (state, _transport, _leads) = test_state().await;
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/queue/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stats["breaker_state"], "closed");
    }
}
