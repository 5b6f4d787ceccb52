//! Domain models, events, and storage interfaces for the courier
//! outbound-email delivery core.
//!
//! Provides strongly-typed identifiers, the queue-entry and lead data model,
//! the closed email event union, the shared error taxonomy, a clock
//! abstraction for deterministic tests, and the storage traits the core
//! requires of its backing store. The backing store itself is an external
//! collaborator; this crate ships deterministic in-memory implementations
//! used by the service binary and by tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{BounceSeverity, EmailEvent, EventEnvelope, EventKind};
pub use models::{
    CampaignId, EmailRequest, EmailStatus, EntryId, EventId, Lead, LeadId, LeadStatus, QueueEntry,
    QueueStats, StatusHistoryEntry,
};
pub use storage::{EventStore, LeadStore, QueueStore, StatusHistoryStore};
pub use time::{Clock, RealClock, TestClock};
