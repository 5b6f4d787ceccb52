//! Campaign metrics aggregation over stored events.
//!
//! Delivered, opened, and clicked are de-duplicated per recipient: one
//! person opening five times counts once. The send denominator is the
//! number of distinct recipients with a terminal transport outcome
//! (delivered, bounced, or failed), since every handed-off message
//! eventually reports exactly one of those. All rates use safe division.

use std::collections::HashSet;

use courier_core::{CampaignId, CoreError, EmailEvent, EventStore};
use serde::Serialize;

/// Aggregated counts and rates for one campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmailMetrics {
    /// Distinct recipients with a terminal transport outcome.
    pub sent: u64,
    /// Distinct recipients the provider delivered to.
    pub delivered: u64,
    /// Distinct recipients who opened.
    pub opened: u64,
    /// Distinct recipients who clicked.
    pub clicked: u64,
    /// Bounce events recorded.
    pub bounced: u64,
    /// Spam complaints recorded.
    pub complained: u64,
    /// Unsubscribes recorded.
    pub unsubscribed: u64,
    /// Replies recorded.
    pub replied: u64,
    /// delivered / sent.
    pub delivery_rate: f64,
    /// opened / delivered.
    pub open_rate: f64,
    /// clicked / delivered.
    pub click_rate: f64,
    /// bounced / sent.
    pub bounce_rate: f64,
    /// replied / delivered.
    pub reply_rate: f64,
}

/// Aggregates stored events for `campaign_id`.
pub async fn aggregate(
    events: &dyn EventStore,
    campaign_id: CampaignId,
) -> Result<EmailMetrics, CoreError> {
    let stored = events.list_by_campaign(campaign_id).await?;

    let mut delivered_to: HashSet<String> = HashSet::new();
    let mut opened_by: HashSet<String> = HashSet::new();
    let mut clicked_by: HashSet<String> = HashSet::new();
    let mut reached: HashSet<String> = HashSet::new();
    let mut metrics = EmailMetrics::default();

    for event in &stored {
        let recipient = event.envelope().recipient.clone();
        match event {
            EmailEvent::Delivered { .. } => {
                reached.insert(recipient.clone());
                delivered_to.insert(recipient);
            },
            EmailEvent::Opened { .. } => {
                opened_by.insert(recipient);
            },
            EmailEvent::Clicked { .. } => {
                clicked_by.insert(recipient);
            },
            EmailEvent::Bounced { .. } => {
                reached.insert(recipient);
                metrics.bounced += 1;
            },
            EmailEvent::Failed { .. } => {
                reached.insert(recipient);
            },
            EmailEvent::Complained { .. } => metrics.complained += 1,
            EmailEvent::Unsubscribed { .. } => metrics.unsubscribed += 1,
            EmailEvent::Replied { .. } => metrics.replied += 1,
        }
    }

    metrics.sent = reached.len() as u64;
    metrics.delivered = delivered_to.len() as u64;
    metrics.opened = opened_by.len() as u64;
    metrics.clicked = clicked_by.len() as u64;

    metrics.delivery_rate = safe_rate(metrics.delivered, metrics.sent);
    metrics.open_rate = safe_rate(metrics.opened, metrics.delivered);
    metrics.click_rate = safe_rate(metrics.clicked, metrics.delivered);
    metrics.bounce_rate = safe_rate(metrics.bounced, metrics.sent);
    metrics.reply_rate = safe_rate(metrics.replied, metrics.delivered);

    Ok(metrics)
}

#[allow(clippy::cast_precision_loss)]
fn safe_rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn safe_rate_handles_zero_denominator() {
        assert_eq!(super::safe_rate(5, 0), 0.0);
        assert!((super::safe_rate(1, 4) - 0.25).abs() < f64::EPSILON);
    }
}
