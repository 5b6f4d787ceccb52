//! Storage interfaces the delivery core requires of its backing store.
//!
//! The real store (SQL, object storage) lives outside this repository; the
//! core only depends on these traits. Methods are intent-named rather than
//! generic partial updates so that every legal mutation of a queue entry or
//! lead is visible at the trait boundary. The [`memory`] module provides
//! deterministic in-memory implementations used by the service binary and by
//! tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    events::EmailEvent,
    models::{
        CampaignId, EmailStatus, EntryId, Lead, LeadId, LeadStatus, QueueEntry, QueueStats,
        StatusHistoryEntry,
    },
};

/// Durable storage for send-queue entries.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persists a freshly built entry. Failure must propagate: the caller
    /// must not believe a send was queued if it was not durably recorded.
    async fn enqueue(&self, entry: QueueEntry) -> Result<()>;

    /// Fetches an entry by id.
    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>>;

    /// Atomically claims an entry for processing.
    ///
    /// Compare-and-sets `Pending` or `Failed` to `Processing` and returns
    /// the claimed entry. Returns `None` when the entry is missing or
    /// already claimed, which is how concurrent processing passes are
    /// serialized per entry: at most one claimer wins.
    async fn claim(&self, id: EntryId) -> Result<Option<QueueEntry>>;

    /// Releases a claimed entry without recording an attempt.
    ///
    /// Restores `Failed` when a retry watermark is present, `Pending`
    /// otherwise. Used when the circuit breaker blocks the send after the
    /// claim succeeded.
    async fn release(&self, id: EntryId) -> Result<()>;

    /// Records a successful send: `Sent`, provider message id, cleared
    /// error.
    async fn mark_sent(&self, id: EntryId, provider_message_id: &str) -> Result<()>;

    /// Records a retryable failure: `Failed`, bumped retry count, watermark.
    async fn schedule_retry(
        &self,
        id: EntryId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    /// Finalizes an entry as `PermanentFailure`.
    async fn mark_permanent_failure(&self, id: EntryId, retry_count: u32, error: &str)
        -> Result<()>;

    /// Records a provider-reported bounce against a sent entry.
    async fn mark_bounced(&self, id: EntryId) -> Result<()>;

    /// Looks an entry up by the provider-assigned message id.
    async fn find_by_provider_message_id(&self, message_id: &str) -> Result<Option<QueueEntry>>;

    /// Lists entries in `status`, oldest first, up to `limit`.
    async fn list_by_status(&self, status: EmailStatus, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Lists `Failed` entries whose retry watermark is due, up to `limit`.
    async fn list_ready_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>>;

    /// Lists `Bounced` entries created at or after `cutoff`, up to `limit`.
    async fn list_bounced_for_retry(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>>;

    /// Resets a bounced entry to `Pending` for one more delivery attempt.
    ///
    /// Zeroes the retry counter when `reset_budget` is set; the daily bounce
    /// sweep makes that an explicit policy choice.
    async fn reset_for_retry(&self, id: EntryId, reset_budget: bool) -> Result<()>;

    /// Aggregate counts per status plus the mean retry count.
    async fn stats(&self) -> Result<QueueStats>;

    /// Retention sweep: deletes settled entries created before `cutoff`.
    /// Returns the number of deleted entries.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Append-only storage for delivery-lifecycle events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists one event.
    async fn insert(&self, event: &EmailEvent) -> Result<()>;

    /// All events recorded for a campaign.
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<EmailEvent>>;
}

/// Read/update access to lead records.
///
/// The status field is only ever written through
/// [`set_status`](LeadStore::set_status), which the status tracker calls
/// after validating the transition.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Fetches a lead by id.
    async fn get(&self, id: LeadId) -> Result<Option<Lead>>;

    /// Inserts or replaces a lead record.
    async fn upsert(&self, lead: Lead) -> Result<()>;

    /// Writes a validated status, optionally touching `last_contacted_at`.
    async fn set_status(&self, id: LeadId, status: LeadStatus, touch_contacted: bool)
        -> Result<()>;
}

/// Append-only storage for status transition history.
#[async_trait]
pub trait StatusHistoryStore: Send + Sync {
    /// Appends one history row.
    async fn append(&self, entry: StatusHistoryEntry) -> Result<()>;

    /// All history rows for a lead, oldest first.
    async fn list_for_lead(&self, lead_id: LeadId) -> Result<Vec<StatusHistoryEntry>>;
}
