//! Transition-validated status tracking with history and notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::{
    CoreError, LeadId, LeadStatus, LeadStore, Result, StatusHistoryEntry, StatusHistoryStore,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::subscriber::StatusSubscriber;

/// Options accompanying one status update.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    /// Machine-readable reason, recorded in history.
    pub reason: Option<String>,
    /// Free-form notes, recorded in history for human reviewers.
    pub notes: Option<String>,
    /// Who or what performed the transition.
    pub actor: Option<String>,
    /// Whether to invoke registered subscribers after the update commits.
    pub notify: bool,
}

impl Default for StatusUpdate {
    fn default() -> Self {
        Self { reason: None, notes: None, actor: None, notify: true }
    }
}

impl StatusUpdate {
    /// Update with a reason and nothing else.
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self { reason: Some(reason.into()), ..Self::default() }
    }
}

/// An accepted, committed status transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    /// Lead that transitioned.
    pub lead_id: LeadId,
    /// Status before.
    pub from: LeadStatus,
    /// Status after.
    pub to: LeadStatus,
    /// Reason recorded with the transition.
    pub reason: Option<String>,
    /// Notes recorded with the transition.
    pub notes: Option<String>,
    /// When the transition was accepted.
    pub changed_at: DateTime<Utc>,
}

/// Per-lead result of a batch update.
#[derive(Debug)]
pub struct BatchStatusResult {
    /// Lead the result refers to.
    pub lead_id: LeadId,
    /// The committed change, or why it was rejected.
    pub result: Result<StatusChange>,
}

struct Subscription {
    filter: Option<LeadStatus>,
    subscriber: Arc<dyn StatusSubscriber>,
}

/// Enforces the lead lifecycle state machine.
pub struct StatusTracker {
    leads: Arc<dyn LeadStore>,
    history: Arc<dyn StatusHistoryStore>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl StatusTracker {
    /// Creates a tracker over the given lead and history stores.
    pub fn new(leads: Arc<dyn LeadStore>, history: Arc<dyn StatusHistoryStore>) -> Self {
        Self { leads, history, subscriptions: RwLock::new(Vec::new()) }
    }

    /// Registers a subscriber.
    ///
    /// With `filter` set, the subscriber fires only when a lead enters that
    /// status; with `None` it fires on every status change.
    pub async fn subscribe(&self, filter: Option<LeadStatus>, subscriber: Arc<dyn StatusSubscriber>) {
        self.subscriptions.write().await.push(Subscription { filter, subscriber });
    }

    /// Side-effect-free pre-flight check for a transition.
    ///
    /// Lets callers (a dashboard, a bulk tool) find out whether a move
    /// would be accepted without mutating anything.
    pub async fn validate_transition(&self, id: LeadId, to: LeadStatus) -> Result<()> {
        let lead = self
            .leads
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("lead {id}")))?;
        if lead.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition { from: lead.status, to })
        }
    }

    /// Validates and applies one status transition.
    ///
    /// On success the lead record is updated (`last_contacted_at` is
    /// touched when moving into `Emailed` or `Called`), exactly one history
    /// row is appended, and — unless `update.notify` is false — every
    /// matching subscriber is invoked. Subscriber failures are logged and
    /// never abort the update that already committed.
    pub async fn update_lead_status(
        &self,
        id: LeadId,
        to: LeadStatus,
        update: StatusUpdate,
    ) -> Result<StatusChange> {
        let lead = self
            .leads
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("lead {id}")))?;

        if !lead.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition { from: lead.status, to });
        }

        let touch_contacted = matches!(to, LeadStatus::Emailed | LeadStatus::Called);
        self.leads.set_status(id, to, touch_contacted).await?;

        let changed_at = Utc::now();
        self.history
            .append(StatusHistoryEntry {
                id: Uuid::new_v4(),
                lead_id: id,
                from_status: lead.status,
                to_status: to,
                reason: update.reason.clone(),
                notes: update.notes.clone(),
                actor: update.actor.clone(),
                changed_at,
            })
            .await?;

        let change = StatusChange {
            lead_id: id,
            from: lead.status,
            to,
            reason: update.reason,
            notes: update.notes,
            changed_at,
        };
        debug!(lead_id = %id, from = %change.from, to = %change.to, "lead status updated");

        if update.notify {
            self.notify(&change).await;
        }
        Ok(change)
    }

    /// Applies a list of updates independently.
    ///
    /// One invalid lead must not block the rest of a bulk operation, so
    /// each update is attempted on its own and the per-lead results are
    /// collected.
    pub async fn update_status_batch(
        &self,
        updates: Vec<(LeadId, LeadStatus, StatusUpdate)>,
    ) -> Vec<BatchStatusResult> {
        let mut results = Vec::with_capacity(updates.len());
        for (id, to, update) in updates {
            let result = self.update_lead_status(id, to, update).await;
            results.push(BatchStatusResult { lead_id: id, result });
        }
        results
    }

    async fn notify(&self, change: &StatusChange) {
        let subscriptions = self.subscriptions.read().await;
        for subscription in subscriptions.iter() {
            if subscription.filter.is_some_and(|status| status != change.to) {
                continue;
            }
            if let Err(error) = subscription.subscriber.on_status_change(change).await {
                warn!(
                    lead_id = %change.lead_id,
                    to = %change.to,
                    error = %error,
                    "status subscriber failed"
                );
            }
        }
    }
}
