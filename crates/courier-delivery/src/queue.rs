//! Durable send queue with retry scheduling and breaker protection.
//!
//! Owns the queue-entry lifecycle: enqueue creates a durable `Pending`
//! entry, processing passes claim entries one at a time and call the
//! provider through the circuit breaker, and failures are classified into a
//! scheduled retry or a permanent finalization. Batch passes degrade
//! gracefully under provider outage: they abort the remainder and report
//! partial counts instead of failing the call.

use std::sync::Arc;

use chrono::TimeDelta;
use courier_core::{
    CoreError, EmailRequest, EmailStatus, EntryId, EventKind, QueueEntry, QueueStats, QueueStore,
    Clock, RealClock,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    circuit::{BreakerError, CircuitBreaker, CircuitState},
    error::QueueError,
    retry::BackoffPolicy,
    transport::{EmailMessage, EmailTransport},
};

/// Send-queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Default retry budget for entries that do not override it.
    pub max_retries: u32,
    /// Backoff schedule for retryable failures.
    pub backoff: BackoffPolicy,
    /// Whether the daily bounce sweep zeroes the retry counter.
    ///
    /// On by default: the sweep's premise is that many bounces are
    /// transient and deserve a fresh attempt after the cooling-off period.
    /// Operators who consider that too generous can keep the spent budget.
    pub reset_bounce_retry_budget: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
            reset_bounce_retry_budget: true,
        }
    }
}

/// Partial-success counts for one batch processing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Entries attempted in this pass.
    pub processed: u64,
    /// Entries accepted by the provider.
    pub sent: u64,
    /// Attempts that failed (retry-scheduled plus permanent).
    pub failed: u64,
    /// Failures that were scheduled for a later retry.
    pub retry_queued: u64,
    /// Failures finalized with no further retry.
    pub permanent_failures: u64,
    /// Entries skipped because another pass already claimed them.
    pub skipped: u64,
    /// Whether the pass stopped early because the breaker reported open.
    pub aborted: bool,
}

/// Result of processing a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The provider accepted the message.
    Sent,
    /// A retryable failure was recorded and a retry scheduled.
    RetryScheduled,
    /// The entry was finalized without success.
    PermanentFailure,
    /// The entry was missing or already claimed by another pass.
    Skipped,
    /// The breaker blocked the send; the entry was released unchanged.
    BreakerOpen,
}

/// Queue counts combined with the live breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// Aggregate entry counts.
    pub stats: QueueStats,
    /// Current circuit breaker state.
    pub breaker_state: CircuitState,
}

/// The send queue.
pub struct SendQueue {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn EmailTransport>,
    breaker: Arc<CircuitBreaker>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl SendQueue {
    /// Creates a queue over the given store, transport, and breaker.
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn EmailTransport>,
        breaker: Arc<CircuitBreaker>,
        config: QueueConfig,
    ) -> Self {
        Self::with_clock(store, transport, breaker, config, Arc::new(RealClock))
    }

    /// Creates a queue with an injected clock, for deterministic tests.
    pub fn with_clock(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn EmailTransport>,
        breaker: Arc<CircuitBreaker>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, transport, breaker, config, clock }
    }

    /// Durably enqueues an email and returns the new entry id.
    ///
    /// The entry is persisted before this returns; an enqueue that cannot
    /// be recorded propagates as an error rather than pretending the send
    /// is on its way.
    pub async fn queue_email(&self, request: EmailRequest) -> Result<EntryId, CoreError> {
        if request.to.is_empty() {
            return Err(CoreError::invalid_input("recipient address is empty"));
        }
        if request.from.is_empty() {
            return Err(CoreError::invalid_input("sender address is empty"));
        }

        let entry = QueueEntry::new(request, self.config.max_retries, self.clock.now_utc());
        let id = entry.id;
        self.store.enqueue(entry).await?;
        debug!(entry_id = %id, "email queued");
        Ok(id)
    }

    /// Claims and processes one entry through the breaker-guarded provider.
    pub async fn process_entry(&self, id: EntryId) -> Result<ProcessOutcome, QueueError> {
        let Some(entry) = self.store.claim(id).await? else {
            return Ok(ProcessOutcome::Skipped);
        };

        let message = build_message(&entry);
        match self.breaker.execute(|| self.transport.send_email(&message)).await {
            Ok(receipt) => {
                self.store.mark_sent(id, &receipt.message_id).await?;
                info!(entry_id = %id, message_id = %receipt.message_id, "email sent");
                Ok(ProcessOutcome::Sent)
            },
            Err(BreakerError::Open(_)) => {
                // Not an attempt: the provider was never called. Put the
                // entry back the way it was for a later pass.
                self.store.release(id).await?;
                Ok(ProcessOutcome::BreakerOpen)
            },
            Err(BreakerError::Inner(error)) => {
                let attempts = entry.retry_count + 1;
                if !error.is_retryable() || attempts >= entry.max_retries {
                    self.store
                        .mark_permanent_failure(id, attempts, &error.to_string())
                        .await?;
                    warn!(
                        entry_id = %id,
                        attempts,
                        error = %error,
                        "send permanently failed"
                    );
                    Ok(ProcessOutcome::PermanentFailure)
                } else {
                    let next_retry_at = match error.retry_after_seconds() {
                        // Provider throttling guidance overrides backoff.
                        Some(seconds) => {
                            self.clock.now_utc() + TimeDelta::seconds(seconds as i64)
                        },
                        None => {
                            self.config.backoff.next_retry_at(self.clock.now_utc(), entry.retry_count)
                        },
                    };
                    self.store
                        .schedule_retry(id, attempts, next_retry_at, &error.to_string())
                        .await?;
                    warn!(
                        entry_id = %id,
                        attempts,
                        next_retry_at = %next_retry_at,
                        error = %error,
                        "send failed, retry scheduled"
                    );
                    Ok(ProcessOutcome::RetryScheduled)
                }
            },
        }
    }

    /// Processes up to `limit` `Pending` entries.
    pub async fn process_pending_queue(&self, limit: usize) -> Result<BatchSummary, QueueError> {
        let entries = self.store.list_by_status(EmailStatus::Pending, limit).await?;
        self.process_batch(entries).await
    }

    /// Processes up to `limit` `Failed` entries whose retry watermark is due.
    pub async fn process_retry_queue(&self, limit: usize) -> Result<BatchSummary, QueueError> {
        let entries = self.store.list_ready_for_retry(self.clock.now_utc(), limit).await?;
        self.process_batch(entries).await
    }

    /// Once-daily sweep giving recent bounces one more delivery attempt.
    ///
    /// Bounced entries younger than `max_age_days` go back to `Pending` —
    /// full mailboxes and transient DNS trouble clear up — and are then
    /// processed like any other pending batch.
    pub async fn process_daily_bounce_retry(
        &self,
        max_age_days: u32,
        limit: usize,
    ) -> Result<BatchSummary, QueueError> {
        let cutoff = self.clock.now_utc() - TimeDelta::days(i64::from(max_age_days));
        let bounced = self.store.list_bounced_for_retry(cutoff, limit).await?;
        if bounced.is_empty() {
            return Ok(BatchSummary::default());
        }

        info!(count = bounced.len(), "resetting bounced entries for retry");
        for entry in &bounced {
            self.store
                .reset_for_retry(entry.id, self.config.reset_bounce_retry_budget)
                .await?;
        }
        self.process_batch(bounced).await
    }

    /// Applies a provider delivery signal to the entry that owns the
    /// message. Returns whether an entry was updated.
    ///
    /// `Bounced` marks the entry bounced, `Failed` finalizes it, and
    /// `Delivered` is a no-op (the entry is already `Sent`). Signals for
    /// unknown message ids are logged and ignored — the provider also
    /// reports on messages that were never ours to track.
    pub async fn handle_webhook_event(
        &self,
        message_id: &str,
        kind: EventKind,
    ) -> Result<bool, CoreError> {
        let Some(entry) = self.store.find_by_provider_message_id(message_id).await? else {
            warn!(message_id, kind = %kind, "webhook signal for unknown message id");
            return Ok(false);
        };

        match kind {
            EventKind::Bounced => {
                self.store.mark_bounced(entry.id).await?;
                info!(entry_id = %entry.id, message_id, "entry marked bounced");
                Ok(true)
            },
            EventKind::Failed => {
                self.store
                    .mark_permanent_failure(
                        entry.id,
                        entry.retry_count,
                        "provider reported delivery failure",
                    )
                    .await?;
                info!(entry_id = %entry.id, message_id, "entry marked permanently failed");
                Ok(true)
            },
            EventKind::Delivered
            | EventKind::Opened
            | EventKind::Clicked
            | EventKind::Complained
            | EventKind::Unsubscribed
            | EventKind::Replied => Ok(false),
        }
    }

    /// Aggregate queue counts plus the current breaker state.
    pub async fn stats(&self) -> Result<QueueSnapshot, CoreError> {
        Ok(QueueSnapshot {
            stats: self.store.stats().await?,
            breaker_state: self.breaker.state().await,
        })
    }

    /// Retention sweep: deletes settled entries older than `days`.
    pub async fn sweep_older_than(&self, days: u32) -> Result<u64, CoreError> {
        let cutoff = self.clock.now_utc() - TimeDelta::days(i64::from(days));
        let deleted = self.store.delete_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted, days, "retention sweep removed settled entries");
        }
        Ok(deleted)
    }

    async fn process_batch(
        &self,
        entries: Vec<QueueEntry>,
    ) -> Result<BatchSummary, QueueError> {
        let mut summary = BatchSummary::default();

        for entry in entries {
            // The breaker check between entries is what lets a batch stop
            // quickly once the provider starts failing.
            if self.breaker.state().await == CircuitState::Open {
                summary.aborted = true;
                break;
            }

            match self.process_entry(entry.id).await? {
                ProcessOutcome::Sent => {
                    summary.processed += 1;
                    summary.sent += 1;
                },
                ProcessOutcome::RetryScheduled => {
                    summary.processed += 1;
                    summary.failed += 1;
                    summary.retry_queued += 1;
                },
                ProcessOutcome::PermanentFailure => {
                    summary.processed += 1;
                    summary.failed += 1;
                    summary.permanent_failures += 1;
                },
                ProcessOutcome::Skipped => {
                    summary.skipped += 1;
                },
                ProcessOutcome::BreakerOpen => {
                    summary.aborted = true;
                    break;
                },
            }
        }

        if summary.aborted {
            warn!(?summary, "batch aborted: circuit breaker open");
        } else {
            debug!(?summary, "batch pass complete");
        }
        Ok(summary)
    }
}

fn build_message(entry: &QueueEntry) -> EmailMessage {
    let mut tags = Vec::new();
    if let Some(lead_id) = entry.lead_id {
        tags.push(format!("lead-{lead_id}"));
    }
    if let Some(campaign_id) = entry.campaign_id {
        tags.push(format!("campaign-{campaign_id}"));
    }
    EmailMessage {
        to: entry.to.clone(),
        from: entry.from.clone(),
        subject: entry.subject.clone(),
        html: entry.html.clone(),
        text: entry.text.clone(),
        tags,
    }
}
