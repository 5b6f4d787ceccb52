//! Lead lifecycle state machine.
//!
//! The status tracker is the single point of transition validation: every
//! lead status change in the system — webhook-driven or operator-driven —
//! goes through [`StatusTracker::update_lead_status`], which checks the
//! transition table, writes the lead record, appends exactly one history
//! row, and notifies registered subscribers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod subscriber;
pub mod tracker;

pub use subscriber::{StatusSubscriber, WebhookSubscriber};
pub use tracker::{BatchStatusResult, StatusChange, StatusTracker, StatusUpdate};
