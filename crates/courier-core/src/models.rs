//! Core domain models and strongly-typed identifiers.
//!
//! Defines queue entries, leads, the lead lifecycle state machine, and
//! newtype ID wrappers for compile-time type safety. The lead transition
//! table lives on [`LeadStatus`] itself so that every consumer goes through
//! the same exhaustively-matched rules.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed send-queue entry identifier.
///
/// Wraps a UUID to prevent mixing with lead or event ids. Assigned on
/// enqueue and stable for the entry's entire lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Creates a new random entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed lead identifier.
///
/// Leads are owned by the CRM side of the system; the delivery core only
/// ever references them by id and mutates them through the status tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub Uuid);

impl LeadId {
    /// Creates a new random lead ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LeadId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed campaign identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub Uuid);

impl CampaignId {
    /// Creates a new random campaign ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CampaignId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed domain-event identifier.
///
/// Minted by the webhook pipeline for every processed webhook call, so a
/// redelivered provider webhook produces a fresh stored event rather than
/// colliding with the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Send-queue entry lifecycle status.
///
/// ```text
/// Pending -> Processing -> Sent
///                       -> Failed (scheduled retry) -> Processing ...
///                       -> PermanentFailure
/// Sent -> Bounced | PermanentFailure   (webhook-driven only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    /// Queued and waiting for the next processing pass.
    Pending,
    /// Claimed by a processing pass; at most one claimer at a time.
    Processing,
    /// Accepted by the provider; provider message id recorded.
    Sent,
    /// A retryable failure occurred; `next_retry_at` holds the watermark.
    Failed,
    /// The provider reported a bounce after the send.
    Bounced,
    /// No further attempts will be made.
    PermanentFailure,
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Bounced => write!(f, "bounced"),
            Self::PermanentFailure => write!(f, "permanent_failure"),
        }
    }
}

/// Caller input for enqueuing an outbound email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    /// Recipient address.
    pub to: String,
    /// Sender address.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// Optional plain-text body.
    pub text: Option<String>,
    /// Lead this email belongs to, if any.
    pub lead_id: Option<LeadId>,
    /// Campaign this email belongs to, if any.
    pub campaign_id: Option<CampaignId>,
    /// Per-request retry budget override.
    pub max_retries: Option<u32>,
}

/// Durable send-queue entry.
///
/// Created on enqueue in `Pending` state, mutated only by the send queue
/// during processing and by the webhook pipeline on delivery-failure
/// signals. Never physically deleted except by the age-based retention
/// sweep.
///
/// # Invariants
///
/// - `retry_count <= max_retries`
/// - `next_retry_at` is `Some` only while `status == Failed`
/// - `provider_message_id` is `Some` only after a successful send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique identifier for this entry.
    pub id: EntryId,
    /// Recipient address.
    pub to: String,
    /// Sender address.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// Optional plain-text body.
    pub text: Option<String>,
    /// Correlated lead, if any.
    pub lead_id: Option<LeadId>,
    /// Correlated campaign, if any.
    pub campaign_id: Option<CampaignId>,
    /// Current lifecycle status.
    pub status: EmailStatus,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Maximum attempts before the entry is finalized.
    pub max_retries: u32,
    /// Timestamp of the most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Watermark checked by the retry sweep; `Some` only while `Failed`.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Provider-assigned message id, set after a successful send.
    pub provider_message_id: Option<String>,
    /// When the entry was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the entry was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Builds a fresh `Pending` entry from an enqueue request.
    pub fn new(request: EmailRequest, default_max_retries: u32, now: DateTime<Utc>) -> Self {
        let max_retries = request.max_retries.unwrap_or(default_max_retries);
        Self {
            id: EntryId::new(),
            to: request.to,
            from: request.from,
            subject: request.subject,
            html: request.html,
            text: request.text,
            lead_id: request.lead_id,
            campaign_id: request.campaign_id,
            status: EmailStatus::Pending,
            retry_count: 0,
            max_retries,
            last_attempt_at: None,
            next_retry_at: None,
            last_error: None,
            provider_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lead contact lifecycle status.
///
/// Forms a directed acyclic transition graph; `Converted` and `Declined`
/// are terminal. Leads move along this graph only through the status
/// tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Not yet contacted.
    Pending,
    /// Outreach email sent.
    Emailed,
    /// Needs (or received) human follow-up.
    Called,
    /// Meeting booked.
    Booked,
    /// Became a customer. Terminal.
    Converted,
    /// Opted out, bounced hard, or complained. Terminal.
    Declined,
}

impl LeadStatus {
    /// Returns whether moving from `self` to `next` is an edge in the
    /// lifecycle graph.
    ///
    /// The match is exhaustive on purpose: adding a status without deciding
    /// its edges is a compile error.
    pub fn can_transition_to(self, next: LeadStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Emailed | Self::Called | Self::Declined),
            Self::Emailed => {
                matches!(next, Self::Called | Self::Booked | Self::Converted | Self::Declined)
            },
            Self::Called => matches!(next, Self::Booked | Self::Converted | Self::Declined),
            Self::Booked => matches!(next, Self::Converted | Self::Declined),
            Self::Converted | Self::Declined => false,
        }
    }

    /// Returns whether this status has no outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converted | Self::Declined)
    }

    /// All statuses, in lifecycle order.
    pub const ALL: [LeadStatus; 6] = [
        Self::Pending,
        Self::Emailed,
        Self::Called,
        Self::Booked,
        Self::Converted,
        Self::Declined,
    ];
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Emailed => write!(f, "emailed"),
            Self::Called => write!(f, "called"),
            Self::Booked => write!(f, "booked"),
            Self::Converted => write!(f, "converted"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

/// A prospective customer whose contact status is tracked through the
/// fixed lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    /// Unique identifier.
    pub id: LeadId,
    /// Contact address.
    pub email: String,
    /// Contact name, when known.
    pub name: Option<String>,
    /// Company name, when known.
    pub company: Option<String>,
    /// Current lifecycle status.
    pub status: LeadStatus,
    /// Set when the lead moves into `Emailed` or `Called`.
    pub last_contacted_at: Option<DateTime<Utc>>,
    /// When the lead record was created.
    pub created_at: DateTime<Utc>,
    /// When the lead record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Builds a new lead in `Pending` state.
    pub fn new(id: LeadId, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: email.into(),
            name: None,
            company: None,
            status: LeadStatus::Pending,
            last_contacted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only record of one accepted status transition.
///
/// Created exactly once per accepted transition, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Lead the transition belongs to.
    pub lead_id: LeadId,
    /// Status before the transition.
    pub from_status: LeadStatus,
    /// Status after the transition.
    pub to_status: LeadStatus,
    /// Machine-readable reason, e.g. "spam complaint".
    pub reason: Option<String>,
    /// Free-form notes surfaced to human reviewers.
    pub notes: Option<String>,
    /// Who or what performed the transition.
    pub actor: Option<String>,
    /// When the transition was accepted.
    pub changed_at: DateTime<Utc>,
}

/// Aggregate counts over the send queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries waiting for a first attempt.
    pub pending: u64,
    /// Entries currently claimed by a processing pass.
    pub processing: u64,
    /// Entries accepted by the provider.
    pub sent: u64,
    /// Entries waiting on a scheduled retry.
    pub failed: u64,
    /// Entries the provider bounced.
    pub bounced: u64,
    /// Entries finalized without success.
    pub permanent_failures: u64,
    /// Mean retry count across all entries.
    pub mean_retry_count: f64,
}
