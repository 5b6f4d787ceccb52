//! Courier outbound email delivery service.
//!
//! Wires the delivery core together: in-memory stores (the durable backing
//! store is deployment-specific and plugs in behind the storage traits),
//! the HTTP provider transport, the breaker-guarded send queue, the lead
//! status tracker, the webhook pipeline, the scheduler, and the HTTP
//! surface. Coordinates graceful startup and shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use courier_api::{create_router, AppState, Config, Scheduler};
use courier_core::storage::memory::{
    MemoryEventStore, MemoryLeadStore, MemoryQueueStore, MemoryStatusHistoryStore,
};
use courier_delivery::{CircuitBreaker, HttpEmailTransport, SendQueue};
use courier_leads::StatusTracker;
use courier_pipeline::{PipelineConfig, WebhookPipeline};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_filter);

    info!("starting courier delivery service");

    let transport = Arc::new(
        HttpEmailTransport::new(config.transport_config())
            .context("failed to build provider transport")?,
    );

    let queue_store = Arc::new(MemoryQueueStore::new());
    let event_store = Arc::new(MemoryEventStore::new());
    let lead_store = Arc::new(MemoryLeadStore::new());
    let history_store = Arc::new(MemoryStatusHistoryStore::new());

    let breaker = Arc::new(CircuitBreaker::new("email-provider", config.circuit_config()));
    breaker.on_transition(|from, to| {
        tracing::warn!(%from, %to, "provider circuit breaker transition");
    });

    let queue = Arc::new(SendQueue::new(
        queue_store,
        transport.clone(),
        breaker,
        config.queue_config(),
    ));
    let tracker = Arc::new(StatusTracker::new(lead_store, history_store));
    let pipeline = Arc::new(WebhookPipeline::new(
        transport,
        event_store,
        tracker,
        queue.clone(),
        PipelineConfig::default(),
    ));

    let scheduler = Scheduler::new(queue.clone(), config.schedule_config());
    let scheduler_handles = scheduler.spawn();

    let addr = config.server_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "courier is ready to receive webhooks");

    let app = create_router(AppState { pipeline, queue });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    info!("shutdown signal received, stopping scheduler");
    scheduler.shutdown(scheduler_handles).await;

    info!("courier shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).init();
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
