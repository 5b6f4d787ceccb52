//! Resilient outbound email delivery.
//!
//! This crate implements the send side of the courier core: a durable send
//! queue with capped exponential backoff, a circuit breaker protecting the
//! system from cascading provider outages, and the transactional email
//! provider transport with retryable/fatal error classification.
//!
//! # Processing model
//!
//! Batch processing is sequential within an invocation so the breaker-abort
//! check runs between entries and stops the pass quickly once the provider
//! starts failing. Concurrent invocations are serialized per entry by a
//! compare-and-set claim in the queue store: at most one pass processes a
//! given entry at a time. Retry scheduling is cooperative — a
//! `next_retry_at` watermark checked by the next sweep — so resource usage
//! stays bounded regardless of queue size.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod error;
pub mod queue;
pub mod retry;
pub mod transport;

pub use circuit::{BreakerError, CircuitBreaker, CircuitConfig, CircuitState};
pub use error::{QueueError, TransportError};
pub use queue::{BatchSummary, ProcessOutcome, QueueConfig, QueueSnapshot, SendQueue};
pub use retry::BackoffPolicy;
pub use transport::{EmailMessage, EmailTransport, HttpEmailTransport, SendReceipt, TransportConfig};

/// Default retry budget for queue entries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default batch limit for queue processing passes.
pub const DEFAULT_BATCH_LIMIT: usize = 50;
