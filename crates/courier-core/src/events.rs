//! The closed union of delivery-lifecycle events.
//!
//! Every webhook the provider sends is normalized into exactly one member of
//! [`EmailEvent`]. The union is deliberately closed: adding a provider event
//! type forces a new variant, and every `match` over the union stops
//! compiling until the new case is handled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CampaignId, EventId, LeadId};

/// Fields shared by every delivery-lifecycle event.
///
/// The `event_id` is minted by the webhook pipeline per processed webhook
/// call; a provider redelivery therefore produces a second stored event and
/// downstream handlers are required to be idempotent with respect to
/// repeated outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Pipeline-minted unique identifier.
    pub event_id: EventId,
    /// Provider-assigned id of the message the event refers to.
    pub provider_message_id: String,
    /// Lead that owns the message.
    pub lead_id: LeadId,
    /// Campaign the message belongs to, if tagged.
    pub campaign_id: Option<CampaignId>,
    /// Recipient address the event refers to.
    pub recipient: String,
    /// Provider-reported event time.
    pub occurred_at: DateTime<Utc>,
}

/// Severity of a bounce as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceSeverity {
    /// Hard bounce; the address is not deliverable.
    Permanent,
    /// Soft bounce; full mailbox, greylisting, transient DNS trouble.
    Temporary,
}

/// A delivery-lifecycle event, persisted once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmailEvent {
    /// The provider delivered the message to the recipient's server.
    Delivered {
        /// Shared event fields.
        envelope: EventEnvelope,
    },
    /// The recipient opened the message.
    Opened {
        /// Shared event fields.
        envelope: EventEnvelope,
    },
    /// The recipient clicked a link in the message.
    Clicked {
        /// Shared event fields.
        envelope: EventEnvelope,
        /// Target of the clicked link, when reported.
        url: Option<String>,
    },
    /// The message bounced.
    Bounced {
        /// Shared event fields.
        envelope: EventEnvelope,
        /// Whether the bounce is permanent or transient.
        severity: BounceSeverity,
        /// SMTP-style status code, when reported.
        code: Option<String>,
        /// Human-readable bounce description.
        message: Option<String>,
    },
    /// The recipient reported the message as spam.
    Complained {
        /// Shared event fields.
        envelope: EventEnvelope,
    },
    /// The recipient unsubscribed.
    Unsubscribed {
        /// Shared event fields.
        envelope: EventEnvelope,
    },
    /// The provider gave up delivering the message.
    Failed {
        /// Shared event fields.
        envelope: EventEnvelope,
        /// Provider-reported failure reason.
        reason: Option<String>,
    },
    /// The recipient replied to the message.
    Replied {
        /// Shared event fields.
        envelope: EventEnvelope,
        /// Subject line of the reply.
        subject: Option<String>,
        /// Leading excerpt of the reply body.
        snippet: Option<String>,
        /// Whether the reply text suggests the lead wants to book a call.
        booking_intent: bool,
    },
}

impl EmailEvent {
    /// Shared envelope fields of this event.
    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            Self::Delivered { envelope }
            | Self::Opened { envelope }
            | Self::Clicked { envelope, .. }
            | Self::Bounced { envelope, .. }
            | Self::Complained { envelope }
            | Self::Unsubscribed { envelope }
            | Self::Failed { envelope, .. }
            | Self::Replied { envelope, .. } => envelope,
        }
    }

    /// Discriminant of this event, for labeling and dispatch-free grouping.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Delivered { .. } => EventKind::Delivered,
            Self::Opened { .. } => EventKind::Opened,
            Self::Clicked { .. } => EventKind::Clicked,
            Self::Bounced { .. } => EventKind::Bounced,
            Self::Complained { .. } => EventKind::Complained,
            Self::Unsubscribed { .. } => EventKind::Unsubscribed,
            Self::Failed { .. } => EventKind::Failed,
            Self::Replied { .. } => EventKind::Replied,
        }
    }
}

/// Discriminant-only mirror of [`EmailEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// See [`EmailEvent::Delivered`].
    Delivered,
    /// See [`EmailEvent::Opened`].
    Opened,
    /// See [`EmailEvent::Clicked`].
    Clicked,
    /// See [`EmailEvent::Bounced`].
    Bounced,
    /// See [`EmailEvent::Complained`].
    Complained,
    /// See [`EmailEvent::Unsubscribed`].
    Unsubscribed,
    /// See [`EmailEvent::Failed`].
    Failed,
    /// See [`EmailEvent::Replied`].
    Replied,
}

impl EventKind {
    /// Stable snake_case label for logs and API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Bounced => "bounced",
            Self::Complained => "complained",
            Self::Unsubscribed => "unsubscribed",
            Self::Failed => "failed",
            Self::Replied => "replied",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
