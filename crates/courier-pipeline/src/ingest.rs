//! Normalized-event to domain-event conversion.
//!
//! Two jobs live here: extracting the owning lead (and campaign) from event
//! correlation data, and turning the provider's stringly-typed event into
//! one member of the closed [`EmailEvent`] union. Lead extraction is a
//! single adapter with an explicit precedence order — correlation tags
//! first, then the metadata map — because scattered fallback heuristics are
//! the likeliest source of silent data loss.

use courier_core::{
    BounceSeverity, CampaignId, EmailEvent, EventEnvelope, EventId, LeadId,
};
use courier_delivery::transport::NormalizedEvent;
use thiserror::Error;
use uuid::Uuid;

use crate::intent::detect_booking_intent;

/// Non-retryable conversion failures.
///
/// Each of these indicates an upstream defect (a tagging bug, a provider
/// contract change) and must be surfaced for operator investigation rather
/// than silently dropped.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    /// The event carries no lead correlation at all.
    #[error("event has no lead reference (expected a 'lead-<uuid>' tag or 'lead_id' metadata)")]
    MissingLeadReference,

    /// A lead reference was present but unparseable.
    #[error("malformed lead reference '{value}'")]
    InvalidLeadReference {
        /// The raw value that failed to parse.
        value: String,
    },

    /// The provider sent an event type this pipeline does not know.
    #[error("unknown provider event type '{0}'")]
    UnknownEventType(String),
}

/// Extracts the owning lead id from event correlation data.
///
/// Precedence: a `lead-<uuid>` tag wins; the `lead_id` metadata entry is
/// the fallback. A reference that is present but malformed is an error,
/// not a miss — falling through would hide the tagging defect.
pub fn extract_lead_ref(event: &NormalizedEvent) -> Result<LeadId, IngestError> {
    if let Some(raw) = event.tags.iter().find_map(|tag| tag.strip_prefix("lead-")) {
        return parse_lead(raw);
    }
    if let Some(raw) = event.metadata.get("lead_id") {
        return parse_lead(raw);
    }
    Err(IngestError::MissingLeadReference)
}

fn parse_lead(raw: &str) -> Result<LeadId, IngestError> {
    Uuid::parse_str(raw)
        .map(LeadId::from)
        .map_err(|_| IngestError::InvalidLeadReference { value: raw.to_string() })
}

/// Extracts the campaign id, when present.
///
/// Same precedence as the lead reference, but campaigns are optional: a
/// missing or malformed reference yields `None` rather than an error.
pub fn extract_campaign_ref(event: &NormalizedEvent) -> Option<CampaignId> {
    let raw = event
        .tags
        .iter()
        .find_map(|tag| tag.strip_prefix("campaign-"))
        .or_else(|| event.metadata.get("campaign_id").map(String::as_str))?;
    Uuid::parse_str(raw).map(CampaignId::from).ok()
}

/// Converts a verified provider event into the domain event union.
///
/// `event_id` is minted by the caller per processed webhook call. Unknown
/// provider event types are fatal: the closed union is the contract, and a
/// new type has to be added deliberately.
pub fn to_email_event(
    event: &NormalizedEvent,
    event_id: EventId,
    lead_id: LeadId,
    campaign_id: Option<CampaignId>,
) -> Result<EmailEvent, IngestError> {
    let envelope = EventEnvelope {
        event_id,
        provider_message_id: event.message_id.clone(),
        lead_id,
        campaign_id,
        recipient: event.recipient.clone(),
        occurred_at: event.occurred_at,
    };

    let converted = match event.event_type.as_str() {
        "email.delivered" => EmailEvent::Delivered { envelope },
        "email.opened" => EmailEvent::Opened { envelope },
        "email.clicked" => EmailEvent::Clicked { envelope, url: event.click_url.clone() },
        "email.bounced" => {
            // A bounce without detail is treated as transient: declining a
            // lead on an unclassified bounce is the worse failure mode.
            let severity = match &event.bounce {
                Some(detail) if detail.permanent => BounceSeverity::Permanent,
                _ => BounceSeverity::Temporary,
            };
            EmailEvent::Bounced {
                envelope,
                severity,
                code: event.bounce.as_ref().and_then(|d| d.code.clone()),
                message: event.bounce.as_ref().and_then(|d| d.message.clone()),
            }
        },
        "email.complained" => EmailEvent::Complained { envelope },
        "email.unsubscribed" => EmailEvent::Unsubscribed { envelope },
        "email.failed" => EmailEvent::Failed {
            envelope,
            reason: event.bounce.as_ref().and_then(|d| d.message.clone()),
        },
        "email.replied" => {
            let subject = event.reply.as_ref().and_then(|r| r.subject.clone());
            let snippet = event.reply.as_ref().and_then(|r| r.snippet.clone());
            let mut text = String::new();
            if let Some(subject) = &subject {
                text.push_str(subject);
                text.push(' ');
            }
            if let Some(snippet) = &snippet {
                text.push_str(snippet);
            }
            EmailEvent::Replied {
                envelope,
                subject,
                snippet,
                booking_intent: detect_booking_intent(&text),
            }
        },
        other => return Err(IngestError::UnknownEventType(other.to_string())),
    };

    Ok(converted)
}
