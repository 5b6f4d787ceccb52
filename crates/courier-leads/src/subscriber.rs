//! Subscriber side of the status notification mechanism.

use async_trait::async_trait;
use std::time::Duration;

use crate::tracker::StatusChange;

/// Receives committed status changes.
///
/// Implementations must tolerate being called for the same logical change
/// more than once: webhook redelivery can re-drive a transition whose
/// outcome already holds. Errors are logged by the tracker and never abort
/// the update that already committed.
#[async_trait]
pub trait StatusSubscriber: Send + Sync {
    /// Handles one committed status change.
    async fn on_status_change(&self, change: &StatusChange) -> anyhow::Result<()>;
}

/// Subscriber that POSTs each change as JSON to a configured URL.
///
/// The outbound notification counterpart of the tracker: downstream systems
/// (CRM sync, Slack bridges) register a URL instead of linking against this
/// crate.
#[derive(Debug, Clone)]
pub struct WebhookSubscriber {
    client: reqwest::Client,
    url: String,
}

impl WebhookSubscriber {
    /// Creates a subscriber posting to `url`.
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl StatusSubscriber for WebhookSubscriber {
    async fn on_status_change(&self, change: &StatusChange) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(change).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("status webhook returned HTTP {}", response.status().as_u16());
        }
        Ok(())
    }
}
