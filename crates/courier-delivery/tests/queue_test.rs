//! Integration tests for the send queue lifecycle.
//!
//! Drives the queue against the in-memory store, a scripted transport, and
//! a deterministic clock: retry scheduling, permanent finalization, breaker
//! aborts, the daily bounce sweep, and webhook-driven entry updates.

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use courier_core::{
    storage::memory::MemoryQueueStore, Clock, CoreError, EmailRequest, EmailStatus, EventKind,
    LeadId, QueueStore, TestClock,
};
use courier_delivery::{
    transport::{mock::MockTransport, SendReceipt},
    BackoffPolicy, CircuitBreaker, CircuitConfig, CircuitState, ProcessOutcome, QueueConfig,
    SendQueue, TransportError,
};

struct Harness {
    store: Arc<MemoryQueueStore>,
    transport: Arc<MockTransport>,
    breaker: Arc<CircuitBreaker>,
    clock: TestClock,
    queue: SendQueue,
}

fn harness_with(config: QueueConfig, circuit: CircuitConfig) -> Harness {
    let store = Arc::new(MemoryQueueStore::new());
    let transport = Arc::new(MockTransport::new());
    let clock = TestClock::new();
    let breaker = Arc::new(CircuitBreaker::with_clock("provider", circuit, Arc::new(clock.clone())));
    let queue = SendQueue::with_clock(
        store.clone(),
        transport.clone(),
        breaker.clone(),
        config,
        Arc::new(clock.clone()),
    );
    Harness { store, transport, breaker, clock, queue }
}

fn harness() -> Harness {
    let config = QueueConfig {
        backoff: BackoffPolicy { jitter: 0.0, ..BackoffPolicy::default() },
        ..QueueConfig::default()
    };
    harness_with(config, CircuitConfig::default())
}

fn request(to: &str) -> EmailRequest {
    EmailRequest {
        to: to.to_string(),
        from: "outreach@example.com".to_string(),
        subject: "Quick question".to_string(),
        html: "<p>Hello</p>".to_string(),
        text: None,
        lead_id: Some(LeadId::new()),
        campaign_id: None,
        max_retries: None,
    }
}

#[tokio::test]
async fn queue_email_persists_a_pending_entry() {
    let h = harness();
    let id = h.queue.queue_email(request("a@example.com")).await.expect("enqueue succeeds");

    let entry = h.store.get(id).await.unwrap().expect("entry stored");
    assert_eq!(entry.status, EmailStatus::Pending);
    assert_eq!(entry.retry_count, 0);
    assert_eq!(entry.max_retries, 3);
}

#[tokio::test]
async fn enqueue_storage_failure_propagates() {
    let h = harness();
    h.store.inject_failure("write failed").await;

    let err = h.queue.queue_email(request("a@example.com")).await.unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn successful_send_marks_entry_sent_with_message_id() {
    let h = harness();
    h.transport.script_send(Ok(SendReceipt { message_id: "msg-1".to_string() }));

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    let outcome = h.queue.process_entry(id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Sent);

    let entry = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, EmailStatus::Sent);
    assert_eq!(entry.provider_message_id.as_deref(), Some("msg-1"));
    assert!(entry.last_error.is_none());
    assert!(entry.next_retry_at.is_none());

    // The message carried the lead correlation tag.
    let sent = h.transport.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].tags.iter().any(|tag| tag.starts_with("lead-")));
}

#[tokio::test]
async fn retryable_failure_schedules_backoff_retry() {
    let h = harness();
    h.transport.script_send(Err(TransportError::provider(503, "unavailable")));

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    let outcome = h.queue.process_entry(id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::RetryScheduled);

    let entry = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, EmailStatus::Failed);
    assert_eq!(entry.retry_count, 1);
    let next = entry.next_retry_at.expect("watermark set");
    // Zero jitter: exactly base_delay past the (test) clock's now.
    assert_eq!(next - h.clock.now_utc(), TimeDelta::seconds(60));
    assert!(entry.last_error.is_some());
}

#[tokio::test]
async fn throttling_guidance_overrides_backoff() {
    let h = harness();
    h.transport.script_send(Err(TransportError::rate_limited(Some(600))));

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    h.queue.process_entry(id).await.unwrap();

    let entry = h.store.get(id).await.unwrap().unwrap();
    let next = entry.next_retry_at.expect("watermark set");
    assert_eq!(next - h.clock.now_utc(), TimeDelta::seconds(600));
}

#[tokio::test]
async fn three_retryable_failures_exhaust_the_budget() {
    let h = harness();
    for _ in 0..3 {
        h.transport.script_send(Err(TransportError::timeout(30)));
    }

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();

    assert_eq!(h.queue.process_entry(id).await.unwrap(), ProcessOutcome::RetryScheduled);
    assert_eq!(h.queue.process_entry(id).await.unwrap(), ProcessOutcome::RetryScheduled);
    assert_eq!(h.queue.process_entry(id).await.unwrap(), ProcessOutcome::PermanentFailure);

    let entry = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, EmailStatus::PermanentFailure);
    assert_eq!(entry.retry_count, 3);
    assert!(entry.next_retry_at.is_none());
}

#[tokio::test]
async fn fatal_errors_finalize_immediately() {
    let h = harness();
    h.transport.script_send(Err(TransportError::rejected(422, "invalid recipient")));

    let id = h.queue.queue_email(request("not-an-address")).await.unwrap();
    let outcome = h.queue.process_entry(id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::PermanentFailure);

    let entry = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, EmailStatus::PermanentFailure);
    assert_eq!(entry.retry_count, 1);
}

#[tokio::test]
async fn batch_aborts_once_the_breaker_opens() {
    let config = QueueConfig {
        backoff: BackoffPolicy { jitter: 0.0, ..BackoffPolicy::default() },
        ..QueueConfig::default()
    };
    let circuit = CircuitConfig { failure_threshold: 1, ..CircuitConfig::default() };
    let h = harness_with(config, circuit);

    h.queue.queue_email(request("a@example.com")).await.unwrap();
    h.queue.queue_email(request("b@example.com")).await.unwrap();
    h.queue.queue_email(request("c@example.com")).await.unwrap();

    // First send fails and trips the breaker; the rest of the batch must
    // not reach the provider.
    h.transport.script_send(Err(TransportError::network("connection refused")));

    let summary = h.queue.process_pending_queue(10).await.unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.retry_queued, 1);
    assert_eq!(summary.sent, 0);
    assert_eq!(h.transport.sent_messages().len(), 1);
    assert_eq!(h.breaker.state().await, CircuitState::Open);
}

#[tokio::test]
async fn retry_queue_honors_the_watermark() {
    let h = harness();
    h.transport.script_send(Err(TransportError::provider(500, "boom")));

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    h.queue.process_entry(id).await.unwrap();

    // Not due yet: nothing to process.
    let summary = h.queue.process_retry_queue(10).await.unwrap();
    assert_eq!(summary.processed, 0);

    h.clock.advance(Duration::from_secs(61));
    let summary = h.queue.process_retry_queue(10).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.sent, 1);

    let entry = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, EmailStatus::Sent);
}

#[tokio::test]
async fn webhook_signals_update_the_owning_entry() {
    let h = harness();
    h.transport.script_send(Ok(SendReceipt { message_id: "msg-7".to_string() }));

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    h.queue.process_entry(id).await.unwrap();

    // Delivered is a no-op: the entry is already Sent.
    assert!(!h.queue.handle_webhook_event("msg-7", EventKind::Delivered).await.unwrap());
    assert_eq!(h.store.get(id).await.unwrap().unwrap().status, EmailStatus::Sent);

    assert!(h.queue.handle_webhook_event("msg-7", EventKind::Bounced).await.unwrap());
    assert_eq!(h.store.get(id).await.unwrap().unwrap().status, EmailStatus::Bounced);

    assert!(h.queue.handle_webhook_event("msg-7", EventKind::Failed).await.unwrap());
    assert_eq!(
        h.store.get(id).await.unwrap().unwrap().status,
        EmailStatus::PermanentFailure
    );

    // Unknown message ids are ignored, not errors.
    assert!(!h.queue.handle_webhook_event("msg-unknown", EventKind::Bounced).await.unwrap());
}

#[tokio::test]
async fn bounce_sweep_resets_and_reprocesses_recent_bounces() {
    let h = harness();
    h.transport.script_send(Ok(SendReceipt { message_id: "msg-9".to_string() }));

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    h.queue.process_entry(id).await.unwrap();
    h.queue.handle_webhook_event("msg-9", EventKind::Bounced).await.unwrap();

    // Unscripted sends succeed, so the swept entry goes straight back out.
    let summary = h.queue.process_daily_bounce_retry(7, 10).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.sent, 1);

    let entry = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, EmailStatus::Sent);
    assert_eq!(entry.retry_count, 0);
}

#[tokio::test]
async fn bounce_sweep_ignores_entries_older_than_the_window() {
    let h = harness();
    h.transport.script_send(Ok(SendReceipt { message_id: "msg-10".to_string() }));

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    h.queue.process_entry(id).await.unwrap();
    h.queue.handle_webhook_event("msg-10", EventKind::Bounced).await.unwrap();

    // The entry was created before the sweep window opens.
    h.clock.advance(Duration::from_secs(10 * 24 * 60 * 60));
    let summary = h.queue.process_daily_bounce_retry(7, 10).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(h.store.get(id).await.unwrap().unwrap().status, EmailStatus::Bounced);
}

#[tokio::test]
async fn claim_failure_propagates_as_storage_error() {
    let h = harness();
    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();

    h.store.inject_failure("claim failed").await;
    let err = h.queue.process_entry(id).await.unwrap_err();
    assert!(matches!(err, courier_delivery::QueueError::Storage(_)));
}

#[tokio::test]
async fn stats_merge_counts_with_breaker_state() {
    let h = harness();
    h.transport.script_send(Ok(SendReceipt { message_id: "msg-11".to_string() }));
    h.transport.script_send(Err(TransportError::timeout(30)));

    let sent_id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    let failed_id = h.queue.queue_email(request("b@example.com")).await.unwrap();
    h.queue.process_entry(sent_id).await.unwrap();
    h.queue.process_entry(failed_id).await.unwrap();

    let snapshot = h.queue.stats().await.unwrap();
    assert_eq!(snapshot.stats.sent, 1);
    assert_eq!(snapshot.stats.failed, 1);
    assert_eq!(snapshot.breaker_state, CircuitState::Closed);
}

#[tokio::test]
async fn retention_sweep_reports_deleted_count() {
    let h = harness();
    h.transport.script_send(Ok(SendReceipt { message_id: "msg-12".to_string() }));

    let id = h.queue.queue_email(request("a@example.com")).await.unwrap();
    h.queue.process_entry(id).await.unwrap();

    // Entry was just created; a 90-day sweep leaves it alone.
    assert_eq!(h.queue.sweep_older_than(90).await.unwrap(), 0);

    h.clock.advance(Duration::from_secs(120 * 24 * 60 * 60));
    assert_eq!(h.queue.sweep_older_than(90).await.unwrap(), 1);
}
