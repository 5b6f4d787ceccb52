//! Cron-style ticks driving the queue's batch methods.
//!
//! The queue itself never spawns tasks or sleeps; this scheduler owns the
//! interval loops and calls into it. Three loops run: the pending pass, the
//! due-retry pass, and a slow maintenance pass (daily bounce retry plus the
//! retention sweep). All three stop on the shared cancellation token.

use std::{sync::Arc, time::Duration};

use courier_delivery::SendQueue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Intervals and limits for the scheduler loops.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Time between pending-queue passes.
    pub pending_interval: Duration,
    /// Time between retry-queue passes.
    pub retry_interval: Duration,
    /// Time between maintenance passes (bounce retry + retention sweep).
    pub bounce_sweep_interval: Duration,
    /// Age limit for bounce re-attempts.
    pub bounce_max_age_days: u32,
    /// Age limit for settled entries before the retention sweep removes
    /// them.
    pub retention_days: u32,
    /// Maximum entries per batch pass.
    pub batch_limit: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            pending_interval: Duration::from_secs(15),
            retry_interval: Duration::from_secs(60),
            bounce_sweep_interval: Duration::from_secs(24 * 60 * 60),
            bounce_max_age_days: 7,
            retention_days: 90,
            batch_limit: courier_delivery::DEFAULT_BATCH_LIMIT,
        }
    }
}

/// Owns the queue-driving interval loops.
pub struct Scheduler {
    queue: Arc<SendQueue>,
    config: ScheduleConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler over the queue.
    pub fn new(queue: Arc<SendQueue>, config: ScheduleConfig) -> Self {
        Self { queue, config, cancel: CancellationToken::new() }
    }

    /// Token that stops all loops when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the three loops and returns their handles.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        info!(
            pending_secs = self.config.pending_interval.as_secs(),
            retry_secs = self.config.retry_interval.as_secs(),
            "starting queue scheduler"
        );
        vec![self.spawn_pending_loop(), self.spawn_retry_loop(), self.spawn_maintenance_loop()]
    }

    /// Signals all loops to stop and waits for them.
    pub async fn shutdown(self, handles: Vec<JoinHandle<()>>) {
        self.cancel.cancel();
        for handle in handles {
            let _ = handle.await;
        }
        info!("queue scheduler stopped");
    }

    fn spawn_pending_loop(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        let period = self.config.pending_interval;
        let limit = self.config.batch_limit;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.process_pending_queue(limit).await {
                            Ok(summary) if summary.processed > 0 || summary.aborted => {
                                info!(?summary, "pending pass");
                            },
                            Ok(_) => {},
                            Err(error) => error!(error = %error, "pending pass failed"),
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }

    fn spawn_retry_loop(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        let period = self.config.retry_interval;
        let limit = self.config.batch_limit;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.process_retry_queue(limit).await {
                            Ok(summary) if summary.processed > 0 || summary.aborted => {
                                info!(?summary, "retry pass");
                            },
                            Ok(_) => {},
                            Err(error) => error!(error = %error, "retry pass failed"),
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }

    fn spawn_maintenance_loop(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        let period = self.config.bounce_sweep_interval;
        let limit = self.config.batch_limit;
        let max_age_days = self.config.bounce_max_age_days;
        let retention_days = self.config.retention_days;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the sweep runs
            // on the period, not at startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.process_daily_bounce_retry(max_age_days, limit).await {
                            Ok(summary) => info!(?summary, "bounce retry sweep"),
                            Err(error) => error!(error = %error, "bounce retry sweep failed"),
                        }
                        match queue.sweep_older_than(retention_days).await {
                            Ok(deleted) if deleted > 0 => info!(deleted, "retention sweep"),
                            Ok(_) => {},
                            Err(error) => error!(error = %error, "retention sweep failed"),
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }
}
