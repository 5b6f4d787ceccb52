//! Webhook ingestion pipeline.
//!
//! Converts opaque provider webhooks into typed domain events, persists
//! them, and routes each to exactly one handler. Events that imply a
//! lifecycle change (hard bounce, spam complaint, reply) drive the status
//! tracker; everything else is metrics-only so intermediate engagement
//! never short-circuits the outreach sequence.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ingest;
pub mod intent;
pub mod metrics;
pub mod processor;

pub use ingest::IngestError;
pub use metrics::EmailMetrics;
pub use processor::{PipelineConfig, WebhookOutcome, WebhookPipeline};
