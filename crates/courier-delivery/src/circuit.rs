//! Circuit breaker guarding calls to the email provider.
//!
//! A three-state failure gate wrapping any fallible unit of work:
//!
//! ```text
//! Closed ──(failure_threshold consecutive failures)──▶ Open
//! Open ──(reset_timeout elapsed)──▶ HalfOpen
//! HalfOpen ──(success_threshold successes)──▶ Closed
//! HalfOpen ──(any failure)──▶ Open
//! ```
//!
//! While `Open` and inside the timeout, [`CircuitBreaker::execute`] fails
//! fast without invoking the work, so a struggling provider is not hit with
//! further traffic. Each breaker is an explicit instance injected into its
//! consumer at construction; there is no process-wide registry, which keeps
//! tests and multi-tenant isolation simple. State transitions are the only
//! externally visible side channel: every one is logged and forwarded to
//! registered listeners as `(old, new)`.

use std::{fmt, future::Future, sync::Arc, time::Instant};

use courier_core::{Clock, RealClock};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Circuit breaker tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures in `Closed` that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes in `HalfOpen` that close the circuit.
    pub success_threshold: u32,
    /// How long an open circuit blocks before probing again.
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Provider considered unhealthy; calls fail fast.
    Open,
    /// Probing recovery; limited trust.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Error returned when the breaker blocks a call without running it.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{resource}' is open")]
pub struct CircuitOpen {
    /// Name of the protected resource.
    pub resource: String,
}

/// Outcome of [`CircuitBreaker::execute`]: either the breaker refused the
/// call, or the work itself failed.
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error,
{
    /// The breaker is open; the work was never invoked.
    #[error(transparent)]
    Open(#[from] CircuitOpen),
    /// The work ran and failed.
    #[error(transparent)]
    Inner(E),
}

type TransitionListener = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Three-state failure gate for a single protected resource.
pub struct CircuitBreaker {
    resource: String,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
    listeners: std::sync::Mutex<Vec<TransitionListener>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("resource", &self.resource)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a breaker for `resource` using the system clock.
    pub fn new(resource: impl Into<String>, config: CircuitConfig) -> Self {
        Self::with_clock(resource, config, Arc::new(RealClock))
    }

    /// Creates a breaker with an injected clock, for deterministic tests.
    pub fn with_clock(
        resource: impl Into<String>,
        config: CircuitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resource: resource.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Name of the protected resource.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Registers a listener invoked with `(old, new)` on every state change.
    pub fn on_transition(
        &self,
        listener: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    /// Runs `work` through the breaker.
    ///
    /// Fails fast with [`BreakerError::Open`] while the circuit is open and
    /// the reset timeout has not elapsed; the work future is never created
    /// in that case. Otherwise the outcome of `work` updates the breaker
    /// counters before being returned.
    pub async fn execute<T, E, F, Fut>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        self.try_acquire().await?;

        match work().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            },
            Err(error) => {
                self.record_failure().await;
                Err(BreakerError::Inner(error))
            },
        }
    }

    /// Current state.
    ///
    /// Read-only apart from the lazy time-based `Open -> HalfOpen`
    /// transition, which is applied before the state is reported.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Forces the breaker back to `Closed` with zeroed counters.
    ///
    /// Operator escape hatch; normal recovery goes through `HalfOpen`.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Records a successful call against the breaker.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                // Failure counter decays rather than resetting, so a slow
                // trickle of failures under mostly-healthy traffic still
                // accumulates.
                inner.failure_count = inner.failure_count.saturating_sub(1);
            },
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed);
                }
            },
            CircuitState::Open => {
                tracing::warn!(resource = %self.resource, "success recorded while circuit open");
            },
        }
    }

    /// Records a failed call against the breaker.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.opened_at = Some(self.clock.now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            },
            CircuitState::HalfOpen => {
                inner.opened_at = Some(self.clock.now());
                inner.success_count = 0;
                self.transition(&mut inner, CircuitState::Open);
            },
            CircuitState::Open => {},
        }
    }

    async fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock().await;
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => Err(CircuitOpen { resource: self.resource.clone() }),
        }
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let Some(opened_at) = inner.opened_at else {
            return;
        };
        if self.clock.now().duration_since(opened_at) >= self.config.reset_timeout {
            inner.success_count = 0;
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        tracing::info!(
            resource = %self.resource,
            from = %from,
            to = %to,
            "circuit breaker state change"
        );
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(from, to);
            }
        }
    }
}
