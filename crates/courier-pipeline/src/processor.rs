//! The webhook processing entry point.
//!
//! `process_webhook` must always return quickly and predictably to the
//! provider, so every step reports into a structured [`WebhookOutcome`]
//! instead of raising. Lifecycle changes go through the status tracker —
//! never directly to the lead record — which keeps the state machine the
//! single point of transition validation.

use std::sync::Arc;

use courier_core::{
    CoreError, EmailEvent, EventId, EventKind, EventStore, LeadId, LeadStatus,
};
use courier_delivery::{transport::EmailTransport, SendQueue};
use courier_leads::{StatusTracker, StatusUpdate};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::{
    ingest::{extract_campaign_ref, extract_lead_ref, to_email_event},
    metrics::{self, EmailMetrics},
};

/// Routing targets for lifecycle-changing events.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Status a permanently bounced lead moves to.
    pub bounce_status: LeadStatus,
    /// Status a complaining lead moves to. Complaints outrank every other
    /// signal: continuing to email a complainant is a reputation risk.
    pub complaint_status: LeadStatus,
    /// Status a replying lead moves to ("needs human follow-up").
    pub reply_status: LeadStatus,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bounce_status: LeadStatus::Declined,
            complaint_status: LeadStatus::Declined,
            reply_status: LeadStatus::Called,
        }
    }
}

/// Structured result of one webhook call.
///
/// The transport layer returns this to the provider verbatim; an exception
/// must never escape past it.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    /// Whether the webhook was fully processed.
    pub success: bool,
    /// Id minted for the stored event, when processing got that far.
    pub event_id: Option<EventId>,
    /// Kind of the converted event, when conversion succeeded.
    pub event_type: Option<EventKind>,
    /// Owning lead, when extraction succeeded.
    pub lead_id: Option<LeadId>,
    /// Whether a lead lifecycle change was committed.
    pub status_updated: bool,
    /// What went wrong, when `success` is false.
    pub error: Option<String>,
}

impl WebhookOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            event_id: None,
            event_type: None,
            lead_id: None,
            status_updated: false,
            error: Some(error.into()),
        }
    }
}

/// Converts provider webhooks into domain events and routes them.
pub struct WebhookPipeline {
    transport: Arc<dyn EmailTransport>,
    events: Arc<dyn EventStore>,
    tracker: Arc<StatusTracker>,
    queue: Arc<SendQueue>,
    config: PipelineConfig,
}

impl WebhookPipeline {
    /// Creates a pipeline over the given collaborators.
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        events: Arc<dyn EventStore>,
        tracker: Arc<StatusTracker>,
        queue: Arc<SendQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self { transport, events, tracker, queue, config }
    }

    /// Processes one provider webhook end to end.
    ///
    /// Steps: verify and parse, extract the owning lead, convert to the
    /// domain event union, persist (best-effort), route to the one handler
    /// for the event type. Reentrant: concurrent calls and provider
    /// redeliveries are safe because every handler converges on repeated
    /// outcomes.
    pub async fn process_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: &str,
    ) -> WebhookOutcome {
        // 1. Verify and parse via the provider-aware transport.
        let normalized = match self.transport.parse_webhook(payload, signature, timestamp) {
            Ok(normalized) => normalized,
            Err(error) => {
                warn!(error = %error, "webhook rejected at parse");
                return WebhookOutcome::failure(error.to_string());
            },
        };

        // 2. Extract the owning lead; absence is a tagging defect upstream
        // and must be surfaced, not papered over.
        let lead_id = match extract_lead_ref(&normalized) {
            Ok(lead_id) => lead_id,
            Err(error) => {
                error!(
                    event_type = %normalized.event_type,
                    message_id = %normalized.message_id,
                    error = %error,
                    "webhook has no usable lead reference"
                );
                return WebhookOutcome::failure(error.to_string());
            },
        };
        let campaign_id = extract_campaign_ref(&normalized);

        // 3. Convert into the closed event union.
        let event_id = EventId::new();
        let event = match to_email_event(&normalized, event_id, lead_id, campaign_id) {
            Ok(event) => event,
            Err(error) => {
                error!(error = %error, "webhook conversion failed");
                let mut outcome = WebhookOutcome::failure(error.to_string());
                outcome.lead_id = Some(lead_id);
                return outcome;
            },
        };
        let kind = event.kind();

        // 4. Persist best-effort: slightly incomplete metrics beat a
        // stalled pipeline.
        if let Err(error) = self.events.insert(&event).await {
            warn!(event_id = %event_id, error = %error, "event persistence failed, continuing");
        }

        // 5. Route to exactly one handler.
        match self.route(&event).await {
            Ok(status_updated) => {
                debug!(event_id = %event_id, kind = %kind, status_updated, "webhook processed");
                WebhookOutcome {
                    success: true,
                    event_id: Some(event_id),
                    event_type: Some(kind),
                    lead_id: Some(lead_id),
                    status_updated,
                    error: None,
                }
            },
            Err(error) => {
                error!(event_id = %event_id, kind = %kind, error = %error, "handler failed");
                WebhookOutcome {
                    success: false,
                    event_id: Some(event_id),
                    event_type: Some(kind),
                    lead_id: Some(lead_id),
                    status_updated: false,
                    error: Some(error.to_string()),
                }
            },
        }
    }

    /// Aggregated campaign metrics over stored events.
    pub async fn email_metrics(
        &self,
        campaign_id: courier_core::CampaignId,
    ) -> Result<EmailMetrics, CoreError> {
        metrics::aggregate(self.events.as_ref(), campaign_id).await
    }

    /// Dispatches one event to its handler. Returns whether a lead
    /// lifecycle change was committed.
    ///
    /// The match is exhaustive over the closed union: a new event type
    /// cannot be added without deciding its handling here.
    async fn route(&self, event: &EmailEvent) -> Result<bool, CoreError> {
        match event {
            // Metrics-only by design: intermediate engagement must not
            // short-circuit the outreach sequence.
            EmailEvent::Delivered { envelope } => {
                self.queue
                    .handle_webhook_event(&envelope.provider_message_id, EventKind::Delivered)
                    .await?;
                Ok(false)
            },
            EmailEvent::Opened { .. } | EmailEvent::Clicked { .. } | EmailEvent::Unsubscribed { .. } => {
                Ok(false)
            },

            EmailEvent::Failed { envelope, .. } => {
                self.queue
                    .handle_webhook_event(&envelope.provider_message_id, EventKind::Failed)
                    .await?;
                Ok(false)
            },

            EmailEvent::Bounced { envelope, severity, code, message } => {
                self.queue
                    .handle_webhook_event(&envelope.provider_message_id, EventKind::Bounced)
                    .await?;
                match severity {
                    courier_core::BounceSeverity::Permanent => {
                        let notes = match (code, message) {
                            (Some(code), Some(message)) => Some(format!("{code}: {message}")),
                            (Some(code), None) => Some(code.clone()),
                            (None, Some(message)) => Some(message.clone()),
                            (None, None) => None,
                        };
                        self.transition(envelope.lead_id, self.config.bounce_status, "hard bounce", notes)
                            .await
                    },
                    courier_core::BounceSeverity::Temporary => Ok(false),
                }
            },

            EmailEvent::Complained { envelope } => {
                self.transition(envelope.lead_id, self.config.complaint_status, "spam complaint", None)
                    .await
            },

            EmailEvent::Replied { envelope, snippet, booking_intent, .. } => {
                let notes = if *booking_intent {
                    Some(match snippet {
                        Some(snippet) => format!("booking intent detected: \"{snippet}\""),
                        None => "booking intent detected".to_string(),
                    })
                } else {
                    snippet.clone()
                };
                self.transition(envelope.lead_id, self.config.reply_status, "reply received", notes)
                    .await
            },
        }
    }

    /// Drives a lifecycle change through the tracker.
    ///
    /// Re-applying an outcome the lead already holds is a no-op, not an
    /// error — provider redelivery must converge. Any other invalid
    /// transition is logged and reported as "no change": the webhook itself
    /// was processed.
    async fn transition(
        &self,
        lead_id: LeadId,
        to: LeadStatus,
        reason: &str,
        notes: Option<String>,
    ) -> Result<bool, CoreError> {
        let update = StatusUpdate {
            reason: Some(reason.to_string()),
            notes,
            actor: Some("webhook-pipeline".to_string()),
            notify: true,
        };
        match self.tracker.update_lead_status(lead_id, to, update).await {
            Ok(_) => Ok(true),
            Err(CoreError::InvalidTransition { from, to }) if from == to => {
                debug!(lead_id = %lead_id, status = %to, "lead already at target status");
                Ok(false)
            },
            Err(CoreError::InvalidTransition { from, to }) => {
                warn!(
                    lead_id = %lead_id,
                    from = %from,
                    to = %to,
                    "webhook-driven transition rejected by state machine"
                );
                Ok(false)
            },
            Err(error) => Err(error),
        }
    }
}
