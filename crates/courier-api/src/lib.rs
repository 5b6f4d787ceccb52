//! Outer service layer for the courier delivery core.
//!
//! Hosts the webhook ingestion endpoint and the observability routes, and
//! owns the scheduler that drives the queue's batch methods on cron-style
//! ticks. The core itself exposes no HTTP or timer surface; everything
//! time- or transport-shaped lives here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod scheduler;
pub mod server;

pub use config::Config;
pub use scheduler::{ScheduleConfig, Scheduler};
pub use server::{create_router, AppState};
