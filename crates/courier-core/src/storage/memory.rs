//! Deterministic in-memory storage implementations.
//!
//! Back the storage traits with `RwLock`-guarded maps for the service binary
//! and for tests. Mutating operations support one-shot failure injection so
//! tests can exercise the propagate-vs-best-effort error paths without a
//! real backing store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::{CoreError, Result},
    events::EmailEvent,
    models::{
        CampaignId, EmailStatus, EntryId, Lead, LeadId, LeadStatus, QueueEntry, QueueStats,
        StatusHistoryEntry,
    },
    storage::{EventStore, LeadStore, QueueStore, StatusHistoryStore},
};

/// One-shot injected failure shared by the memory stores.
#[derive(Debug, Default)]
struct FailureSlot(RwLock<Option<String>>);

impl FailureSlot {
    async fn arm(&self, message: impl Into<String>) {
        *self.0.write().await = Some(message.into());
    }

    async fn trip(&self) -> Result<()> {
        match self.0.write().await.take() {
            Some(message) => Err(CoreError::Storage(message)),
            None => Ok(()),
        }
    }
}

/// In-memory [`QueueStore`].
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    entries: RwLock<HashMap<EntryId, QueueEntry>>,
    fail_next: FailureSlot,
}

impl MemoryQueueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next mutating operation fail with `message`.
    pub async fn inject_failure(&self, message: impl Into<String>) {
        self.fail_next.arm(message).await;
    }

    /// Number of stored entries, for test assertions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn update<F>(&self, id: EntryId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut QueueEntry),
    {
        self.fail_next.trip().await?;
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("queue entry {id}")))?;
        apply(entry);
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        self.fail_next.trip().await?;
        self.entries.write().await.insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn claim(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        self.fail_next.trip().await?;
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&id) else {
            return Ok(None);
        };
        if !matches!(entry.status, EmailStatus::Pending | EmailStatus::Failed) {
            return Ok(None);
        }
        entry.status = EmailStatus::Processing;
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn release(&self, id: EntryId) -> Result<()> {
        self.update(id, |entry| {
            if entry.status == EmailStatus::Processing {
                entry.status = if entry.next_retry_at.is_some() {
                    EmailStatus::Failed
                } else {
                    EmailStatus::Pending
                };
            }
        })
        .await
    }

    async fn mark_sent(&self, id: EntryId, provider_message_id: &str) -> Result<()> {
        let message_id = provider_message_id.to_string();
        self.update(id, |entry| {
            entry.status = EmailStatus::Sent;
            entry.provider_message_id = Some(message_id);
            entry.last_error = None;
            entry.next_retry_at = None;
            entry.last_attempt_at = Some(Utc::now());
        })
        .await
    }

    async fn schedule_retry(
        &self,
        id: EntryId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let error = error.to_string();
        self.update(id, |entry| {
            entry.status = EmailStatus::Failed;
            entry.retry_count = retry_count;
            entry.next_retry_at = Some(next_retry_at);
            entry.last_error = Some(error);
            entry.last_attempt_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_permanent_failure(
        &self,
        id: EntryId,
        retry_count: u32,
        error: &str,
    ) -> Result<()> {
        let error = error.to_string();
        self.update(id, |entry| {
            entry.status = EmailStatus::PermanentFailure;
            entry.retry_count = retry_count;
            entry.next_retry_at = None;
            entry.last_error = Some(error);
            entry.last_attempt_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_bounced(&self, id: EntryId) -> Result<()> {
        self.update(id, |entry| {
            entry.status = EmailStatus::Bounced;
            entry.next_retry_at = None;
        })
        .await
    }

    async fn find_by_provider_message_id(&self, message_id: &str) -> Result<Option<QueueEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .find(|entry| entry.provider_message_id.as_deref() == Some(message_id))
            .cloned())
    }

    async fn list_by_status(&self, status: EmailStatus, limit: usize) -> Result<Vec<QueueEntry>> {
        let mut matching: Vec<QueueEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|entry| entry.created_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_ready_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let mut due: Vec<QueueEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| {
                entry.status == EmailStatus::Failed
                    && entry.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|entry| entry.next_retry_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn list_bounced_for_retry(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let mut eligible: Vec<QueueEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.status == EmailStatus::Bounced && entry.created_at >= cutoff)
            .cloned()
            .collect();
        eligible.sort_by_key(|entry| entry.created_at);
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn reset_for_retry(&self, id: EntryId, reset_budget: bool) -> Result<()> {
        self.update(id, |entry| {
            entry.status = EmailStatus::Pending;
            entry.next_retry_at = None;
            entry.last_error = None;
            if reset_budget {
                entry.retry_count = 0;
            }
        })
        .await
    }

    async fn stats(&self) -> Result<QueueStats> {
        let entries = self.entries.read().await;
        let mut stats = QueueStats::default();
        let mut total_retries = 0u64;
        for entry in entries.values() {
            match entry.status {
                EmailStatus::Pending => stats.pending += 1,
                EmailStatus::Processing => stats.processing += 1,
                EmailStatus::Sent => stats.sent += 1,
                EmailStatus::Failed => stats.failed += 1,
                EmailStatus::Bounced => stats.bounced += 1,
                EmailStatus::PermanentFailure => stats.permanent_failures += 1,
            }
            total_retries += u64::from(entry.retry_count);
        }
        if !entries.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            {
                stats.mean_retry_count = total_retries as f64 / entries.len() as f64;
            }
        }
        Ok(stats)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.fail_next.trip().await?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.created_at >= cutoff
                || !matches!(
                    entry.status,
                    EmailStatus::Sent | EmailStatus::Bounced | EmailStatus::PermanentFailure
                )
        });
        Ok((before - entries.len()) as u64)
    }
}

/// In-memory [`EventStore`].
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<EmailEvent>>,
    fail_next: FailureSlot,
}

impl MemoryEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next insert fail with `message`.
    pub async fn inject_failure(&self, message: impl Into<String>) {
        self.fail_next.arm(message).await;
    }

    /// All stored events, for test assertions.
    pub async fn all(&self) -> Vec<EmailEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: &EmailEvent) -> Result<()> {
        self.fail_next.trip().await?;
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<EmailEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|event| event.envelope().campaign_id == Some(campaign_id))
            .cloned()
            .collect())
    }
}

/// In-memory [`LeadStore`].
#[derive(Debug, Default)]
pub struct MemoryLeadStore {
    leads: RwLock<HashMap<LeadId, Lead>>,
    fail_next: FailureSlot,
}

impl MemoryLeadStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next mutating operation fail with `message`.
    pub async fn inject_failure(&self, message: impl Into<String>) {
        self.fail_next.arm(message).await;
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn get(&self, id: LeadId) -> Result<Option<Lead>> {
        Ok(self.leads.read().await.get(&id).cloned())
    }

    async fn upsert(&self, lead: Lead) -> Result<()> {
        self.fail_next.trip().await?;
        self.leads.write().await.insert(lead.id, lead);
        Ok(())
    }

    async fn set_status(
        &self,
        id: LeadId,
        status: LeadStatus,
        touch_contacted: bool,
    ) -> Result<()> {
        self.fail_next.trip().await?;
        let mut leads = self.leads.write().await;
        let lead = leads.get_mut(&id).ok_or_else(|| CoreError::not_found(format!("lead {id}")))?;
        let now = Utc::now();
        lead.status = status;
        if touch_contacted {
            lead.last_contacted_at = Some(now);
        }
        lead.updated_at = now;
        Ok(())
    }
}

/// In-memory [`StatusHistoryStore`].
#[derive(Debug, Default)]
pub struct MemoryStatusHistoryStore {
    rows: RwLock<Vec<StatusHistoryEntry>>,
    fail_next: FailureSlot,
}

impl MemoryStatusHistoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next append fail with `message`.
    pub async fn inject_failure(&self, message: impl Into<String>) {
        self.fail_next.arm(message).await;
    }
}

#[async_trait]
impl StatusHistoryStore for MemoryStatusHistoryStore {
    async fn append(&self, entry: StatusHistoryEntry) -> Result<()> {
        self.fail_next.trip().await?;
        self.rows.write().await.push(entry);
        Ok(())
    }

    async fn list_for_lead(&self, lead_id: LeadId) -> Result<Vec<StatusHistoryEntry>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|row| row.lead_id == lead_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::models::EmailRequest;

    fn request(to: &str) -> EmailRequest {
        EmailRequest {
            to: to.to_string(),
            from: "outreach@example.com".to_string(),
            subject: "Hello".to_string(),
            html: "<p>Hello</p>".to_string(),
            text: None,
            lead_id: None,
            campaign_id: None,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn claim_admits_exactly_one_processor() {
        let store = MemoryQueueStore::new();
        let entry = QueueEntry::new(request("a@example.com"), 3, Utc::now());
        let id = entry.id;
        store.enqueue(entry).await.unwrap();

        let first = store.claim(id).await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().status, EmailStatus::Processing);

        // Second claim loses the compare-and-set.
        assert!(store.claim(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_restores_prior_state() {
        let store = MemoryQueueStore::new();
        let entry = QueueEntry::new(request("a@example.com"), 3, Utc::now());
        let id = entry.id;
        store.enqueue(entry).await.unwrap();

        store.claim(id).await.unwrap();
        store.release(id).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, EmailStatus::Pending);

        // A failed entry keeps its watermark through claim/release.
        store.schedule_retry(id, 1, Utc::now(), "boom").await.unwrap();
        store.claim(id).await.unwrap();
        store.release(id).await.unwrap();
        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, EmailStatus::Failed);
        assert!(entry.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn ready_for_retry_respects_the_watermark() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();

        let due = QueueEntry::new(request("due@example.com"), 3, now);
        let due_id = due.id;
        let later = QueueEntry::new(request("later@example.com"), 3, now);
        let later_id = later.id;
        store.enqueue(due).await.unwrap();
        store.enqueue(later).await.unwrap();

        store.schedule_retry(due_id, 1, now - TimeDelta::seconds(5), "x").await.unwrap();
        store.schedule_retry(later_id, 1, now + TimeDelta::hours(1), "x").await.unwrap();

        let ready = store.list_ready_for_retry(now, 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, due_id);
    }

    #[tokio::test]
    async fn bounced_sweep_only_sees_entries_younger_than_cutoff() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();

        let mut young = QueueEntry::new(request("young@example.com"), 3, now);
        young.created_at = now - TimeDelta::days(2);
        let young_id = young.id;
        let mut old = QueueEntry::new(request("old@example.com"), 3, now);
        old.created_at = now - TimeDelta::days(30);
        let old_id = old.id;
        store.enqueue(young).await.unwrap();
        store.enqueue(old).await.unwrap();
        store.mark_bounced(young_id).await.unwrap();
        store.mark_bounced(old_id).await.unwrap();

        let eligible =
            store.list_bounced_for_retry(now - TimeDelta::days(7), 10).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, young_id);
    }

    #[tokio::test]
    async fn reset_for_retry_zeroes_budget_only_when_asked() {
        let store = MemoryQueueStore::new();
        let entry = QueueEntry::new(request("a@example.com"), 3, Utc::now());
        let id = entry.id;
        store.enqueue(entry).await.unwrap();
        store.schedule_retry(id, 2, Utc::now(), "x").await.unwrap();
        store.mark_bounced(id).await.unwrap();

        store.reset_for_retry(id, false).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().retry_count, 2);

        store.mark_bounced(id).await.unwrap();
        store.reset_for_retry(id, true).await.unwrap();
        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.status, EmailStatus::Pending);
    }

    #[tokio::test]
    async fn retention_sweep_spares_unsettled_entries() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();

        let mut sent = QueueEntry::new(request("sent@example.com"), 3, now);
        sent.created_at = now - TimeDelta::days(120);
        let sent_id = sent.id;
        let mut pending = QueueEntry::new(request("pending@example.com"), 3, now);
        pending.created_at = now - TimeDelta::days(120);
        store.enqueue(sent).await.unwrap();
        store.enqueue(pending).await.unwrap();
        store.mark_sent(sent_id, "msg-1").await.unwrap();

        let deleted = store.delete_older_than(now - TimeDelta::days(90)).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn stats_reports_counts_and_mean_retries() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();

        let a = QueueEntry::new(request("a@example.com"), 3, now);
        let a_id = a.id;
        let b = QueueEntry::new(request("b@example.com"), 3, now);
        store.enqueue(a).await.unwrap();
        store.enqueue(b).await.unwrap();
        store.schedule_retry(a_id, 2, now, "x").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.mean_retry_count - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn injected_failure_trips_exactly_once() {
        let store = MemoryQueueStore::new();
        store.inject_failure("disk on fire").await;

        let entry = QueueEntry::new(request("a@example.com"), 3, Utc::now());
        let err = store.enqueue(entry.clone()).await.unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));

        store.enqueue(entry).await.unwrap();
    }

    #[tokio::test]
    async fn lead_store_touches_contact_timestamp_on_request() {
        let store = MemoryLeadStore::new();
        let lead = Lead::new(LeadId::new(), "lead@example.com");
        let id = lead.id;
        store.upsert(lead).await.unwrap();

        store.set_status(id, LeadStatus::Emailed, true).await.unwrap();
        let lead = store.get(id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Emailed);
        assert!(lead.last_contacted_at.is_some());

        let err = store.set_status(LeadId::new(), LeadStatus::Called, false).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
