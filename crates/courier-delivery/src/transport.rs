//! Transactional email provider transport.
//!
//! [`EmailTransport`] is the collaborator boundary the send queue and the
//! webhook pipeline depend on: one call to hand a message to the provider,
//! one to verify and normalize a provider webhook. [`HttpEmailTransport`]
//! is the production implementation over the provider's JSON API;
//! [`mock::MockTransport`] is the scripted test double.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info_span, Instrument};

use crate::error::TransportError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed skew between a webhook timestamp and the current time.
const WEBHOOK_TOLERANCE_SECONDS: i64 = 300;

/// Outbound message handed to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    /// Recipient address.
    pub to: String,
    /// Sender address.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// Optional plain-text body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Correlation tags echoed back in webhook events.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider-assigned message id; the key webhook events refer back to.
    pub message_id: String,
}

/// Bounce details attached to a normalized bounce event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BounceDetail {
    /// Whether the address is permanently undeliverable.
    pub permanent: bool,
    /// SMTP-style status code, when reported.
    pub code: Option<String>,
    /// Human-readable description.
    pub message: Option<String>,
}

/// Reply details attached to a normalized reply event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyDetail {
    /// Subject of the reply.
    pub subject: Option<String>,
    /// Leading excerpt of the reply body.
    pub snippet: Option<String>,
}

/// A verified provider webhook, normalized but not yet typed.
///
/// The pipeline converts this into the closed domain event union; the
/// transport keeps the provider's own event-type string so unknown types
/// can be surfaced verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    /// Provider event type, e.g. `email.delivered`.
    pub event_type: String,
    /// Provider-assigned message id.
    pub message_id: String,
    /// Recipient the event refers to.
    pub recipient: String,
    /// Provider-reported event time.
    pub occurred_at: DateTime<Utc>,
    /// Correlation tags attached at send time.
    pub tags: Vec<String>,
    /// Free-form metadata attached at send time.
    pub metadata: HashMap<String, String>,
    /// Bounce details, for bounce events.
    pub bounce: Option<BounceDetail>,
    /// Reply details, for reply events.
    pub reply: Option<ReplyDetail>,
    /// Clicked URL, for click events.
    pub click_url: Option<String>,
}

/// Email provider client boundary.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Hands one message to the provider, returning its message id.
    async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError>;

    /// Verifies a webhook signature and parses the payload into a
    /// normalized event. Fails with [`TransportError::InvalidSignature`]
    /// when the signature or timestamp does not check out.
    fn parse_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: &str,
    ) -> Result<NormalizedEvent, TransportError>;
}

/// Configuration for the HTTP provider client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Provider API base URL.
    pub base_url: String,
    /// Bearer token for the provider API.
    pub api_key: String,
    /// Shared secret for webhook signature verification.
    pub webhook_signing_secret: String,
    /// Request timeout for provider calls.
    pub timeout: Duration,
    /// User agent sent with provider calls.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mailprovider.example".to_string(),
            api_key: String::new(),
            webhook_signing_secret: String::new(),
            timeout: Duration::from_secs(30),
            user_agent: "courier/0.1".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendEmailBody<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    message_id: String,
    recipient: String,
    occurred_at: DateTime<Utc>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    bounce: Option<BounceDetail>,
    reply: Option<ReplyDetail>,
    click: Option<ClickDetail>,
}

#[derive(Debug, Deserialize)]
struct ClickDetail {
    url: String,
}

/// HTTP client for the transactional email provider.
#[derive(Debug, Clone)]
pub struct HttpEmailTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpEmailTransport {
    /// Creates a transport with the given configuration.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        if config.base_url.is_empty() {
            return Err(TransportError::configuration("provider base_url is empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                TransportError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client, config })
    }

    fn map_send_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            return TransportError::timeout(self.config.timeout.as_secs());
        }
        if error.is_connect() {
            return TransportError::network(format!("connection failed: {error}"));
        }
        TransportError::network(error.to_string())
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        let span = info_span!("provider_send", to = %message.to, subject = %message.subject);

        async move {
            let body = SendEmailBody {
                from: &message.from,
                to: &message.to,
                subject: &message.subject,
                html: &message.html,
                text: message.text.as_deref(),
                tags: &message.tags,
            };

            let response = self
                .client
                .post(format!("{}/v1/emails", self.config.base_url.trim_end_matches('/')))
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            let status = response.status();
            if status.is_success() {
                let accepted: SendEmailResponse = response
                    .json()
                    .await
                    .map_err(|e| {
                        TransportError::provider(
                            status.as_u16(),
                            format!("unparseable provider response: {e}"),
                        )
                    })?;
                tracing::debug!(message_id = %accepted.id, "provider accepted message");
                return Ok(SendReceipt { message_id: accepted.id });
            }

            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body_text = response.text().await.unwrap_or_default();

            Err(match status.as_u16() {
                401 | 403 => TransportError::auth(body_text),
                429 => TransportError::rate_limited(retry_after),
                code @ 400..=499 => TransportError::rejected(code, body_text),
                code => TransportError::provider(code, body_text),
            })
        }
        .instrument(span)
        .await
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: &str,
    ) -> Result<NormalizedEvent, TransportError> {
        verify_signature(payload, signature, timestamp, &self.config.webhook_signing_secret)?;

        let parsed: WebhookPayload = serde_json::from_slice(payload)
            .map_err(|e| TransportError::malformed_webhook(e.to_string()))?;

        Ok(NormalizedEvent {
            event_type: parsed.event_type,
            message_id: parsed.data.message_id,
            recipient: parsed.data.recipient,
            occurred_at: parsed.data.occurred_at,
            tags: parsed.data.tags,
            metadata: parsed.data.metadata,
            bounce: parsed.data.bounce,
            reply: parsed.data.reply,
            click_url: parsed.data.click.map(|c| c.url),
        })
    }
}

/// Verifies an HMAC-SHA256 webhook signature over `"{timestamp}.{payload}"`.
///
/// The timestamp rides along in the signed content, so replaying an old
/// payload with a fresh timestamp fails verification and replaying the old
/// timestamp fails the staleness check.
fn verify_signature(
    payload: &[u8],
    signature: &str,
    timestamp: &str,
    secret: &str,
) -> Result<(), TransportError> {
    if secret.is_empty() {
        return Err(TransportError::configuration("webhook signing secret is empty"));
    }
    if signature.is_empty() {
        return Err(TransportError::invalid_signature("signature header is empty"));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| TransportError::invalid_signature("timestamp is not a unix epoch"))?;
    let skew = (Utc::now().timestamp() - ts).abs();
    if skew > WEBHOOK_TOLERANCE_SECONDS {
        return Err(TransportError::invalid_signature(format!(
            "timestamp outside tolerance ({skew}s skew)"
        )));
    }

    let provided = hex::decode(signature)
        .map_err(|_| TransportError::invalid_signature("signature is not hex"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| TransportError::configuration("invalid signing secret"))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&provided)
        .map_err(|_| TransportError::invalid_signature("signature mismatch"))
}

/// Computes the hex signature for a webhook payload.
///
/// Exposed so tests and local tooling can sign synthetic webhooks the same
/// way the provider does.
pub fn sign_webhook(payload: &[u8], timestamp: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub mod mock {
    //! Scripted transport double for tests.
    //!
    //! Send outcomes and webhook parses are queued up front; an unscripted
    //! send succeeds with a generated message id so queue tests do not have
    //! to script the happy path.

    use std::{
        collections::VecDeque,
        sync::Mutex,
    };

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::{EmailMessage, EmailTransport, NormalizedEvent, SendReceipt};
    use crate::error::TransportError;

    /// In-memory [`EmailTransport`] with scripted outcomes.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        send_results: Mutex<VecDeque<Result<SendReceipt, TransportError>>>,
        webhook_results: Mutex<VecDeque<Result<NormalizedEvent, TransportError>>>,
        sent: Mutex<Vec<EmailMessage>>,
    }

    impl MockTransport {
        /// Creates an empty mock.
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues the outcome for the next unscripted send.
        pub fn script_send(&self, result: Result<SendReceipt, TransportError>) {
            self.send_results.lock().expect("mock lock").push_back(result);
        }

        /// Queues the outcome for the next `parse_webhook` call.
        pub fn script_webhook(&self, result: Result<NormalizedEvent, TransportError>) {
            self.webhook_results.lock().expect("mock lock").push_back(result);
        }

        /// Messages handed to `send_email` so far.
        pub fn sent_messages(&self) -> Vec<EmailMessage> {
            self.sent.lock().expect("mock lock").clone()
        }
    }

    #[async_trait]
    impl EmailTransport for MockTransport {
        async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
            self.sent.lock().expect("mock lock").push(message.clone());
            match self.send_results.lock().expect("mock lock").pop_front() {
                Some(result) => result,
                None => Ok(SendReceipt { message_id: format!("mock-{}", Uuid::new_v4()) }),
            }
        }

        fn parse_webhook(
            &self,
            _payload: &[u8],
            _signature: &str,
            _timestamp: &str,
        ) -> Result<NormalizedEvent, TransportError> {
            self.webhook_results
                .lock()
                .expect("mock lock")
                .pop_front()
                .unwrap_or_else(|| {
                    Err(TransportError::malformed_webhook("no scripted webhook result"))
                })
        }
    }
}
