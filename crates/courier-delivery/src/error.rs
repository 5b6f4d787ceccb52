//! Error types for provider transport and queue processing.
//!
//! The transport taxonomy drives retry decisions: network trouble, provider
//! 5xx responses, and throttling are retryable and feed the backoff
//! scheduler; authentication and validation rejections are fatal and
//! finalize the entry immediately. Storage errors are never represented
//! here — they propagate as [`CoreError`] because the queue entries are the
//! durable source of truth.

use courier_core::CoreError;
use thiserror::Error;

/// Errors returned by the email provider transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection-level failure reaching the provider.
    #[error("network error: {message}")]
    Network {
        /// Description of the connection failure.
        message: String,
    },

    /// The provider did not respond within the client timeout.
    #[error("request timeout after {seconds}s")]
    Timeout {
        /// Configured timeout that was exceeded.
        seconds: u64,
    },

    /// The provider responded with a server error (5xx).
    #[error("provider error: HTTP {status}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The provider throttled the request (429).
    #[error("rate limited by provider")]
    RateLimited {
        /// Retry-After guidance, when the provider supplied one.
        retry_after_seconds: Option<u64>,
    },

    /// The provider rejected the request (4xx validation failure,
    /// e.g. a malformed recipient address).
    #[error("request rejected: HTTP {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// Authentication with the provider failed.
    #[error("authentication failed: {message}")]
    Auth {
        /// Description of the authentication failure.
        message: String,
    },

    /// A webhook signature did not verify.
    #[error("invalid webhook signature: {message}")]
    InvalidSignature {
        /// Why verification failed.
        message: String,
    },

    /// A webhook payload could not be parsed.
    #[error("malformed webhook payload: {message}")]
    MalformedWebhook {
        /// Why parsing failed.
        message: String,
    },

    /// The transport itself is misconfigured.
    #[error("transport configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl TransportError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Creates a provider (5xx) error.
    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        Self::Provider { status, message: message.into() }
    }

    /// Creates a rate-limit error.
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a rejection (4xx) error.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected { status, message: message.into() }
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth { message: message.into() }
    }

    /// Creates an invalid-signature error.
    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature { message: message.into() }
    }

    /// Creates a malformed-webhook error.
    pub fn malformed_webhook(message: impl Into<String>) -> Self {
        Self::MalformedWebhook { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this failure is transient and worth a scheduled retry.
    ///
    /// Network errors, timeouts, 5xx responses, and throttling are
    /// retryable. Validation rejections and authentication failures are
    /// not: retrying an invalid address or a bad API key cannot succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Provider { .. }
            | Self::RateLimited { .. } => true,

            Self::Rejected { .. }
            | Self::Auth { .. }
            | Self::InvalidSignature { .. }
            | Self::MalformedWebhook { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// Provider-supplied retry delay, when one exists.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => *retry_after_seconds,
            _ => None,
        }
    }
}

/// Errors surfaced by send-queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store failed; the processing step must be retried by the
    /// caller because the entry's durable state is unknown.
    #[error(transparent)]
    Storage(#[from] CoreError),
}
