//! Configuration for the courier service.
//!
//! Loaded in priority order: environment variables (prefixed `COURIER_`),
//! then `config.toml`, then built-in defaults. The service runs
//! out-of-the-box with production-ready defaults; only the provider
//! credentials genuinely need to be supplied.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use courier_delivery::{
    BackoffPolicy, CircuitConfig, QueueConfig, TransportConfig,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::scheduler::ScheduleConfig;

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Server bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    // Provider
    /// Email provider API base URL.
    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,
    /// Email provider API key.
    #[serde(default)]
    pub provider_api_key: String,
    /// Shared secret for webhook signature verification.
    #[serde(default)]
    pub webhook_signing_secret: String,
    /// Provider request timeout in seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,

    // Queue / retry
    /// Default retry budget per entry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in seconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_seconds: u64,
    /// Maximum delay between retries in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_seconds: u64,
    /// Backoff growth factor per retry.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    /// Jitter fraction (0.0 to 1.0) applied to retry delays.
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
    /// Whether the daily bounce sweep resets the retry budget.
    #[serde(default = "default_true")]
    pub bounce_retry_resets_budget: bool,

    // Circuit breaker
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// Consecutive half-open successes that close the breaker.
    #[serde(default = "default_success_threshold")]
    pub breaker_success_threshold: u32,
    /// Seconds an open breaker waits before probing again.
    #[serde(default = "default_breaker_reset_timeout")]
    pub breaker_reset_timeout_seconds: u64,

    // Scheduler
    /// Seconds between pending-queue passes.
    #[serde(default = "default_pending_poll")]
    pub pending_poll_seconds: u64,
    /// Seconds between retry-queue passes.
    #[serde(default = "default_retry_poll")]
    pub retry_poll_seconds: u64,
    /// Seconds between bounce-sweep passes.
    #[serde(default = "default_bounce_sweep")]
    pub bounce_sweep_seconds: u64,
    /// Bounced entries older than this many days are not re-attempted.
    #[serde(default = "default_bounce_max_age")]
    pub bounce_max_age_days: u32,
    /// Settled entries older than this many days are swept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Maximum entries per batch pass.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    // Logging
    /// Log filter, `RUST_LOG` syntax.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Config {
    /// Loads configuration from defaults, `config.toml`, and `COURIER_`-
    /// prefixed environment variables, highest priority last.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("COURIER_"));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Server socket address from host and port.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        SocketAddr::from_str(&format!("{}:{}", self.host, self.port))
            .context("invalid server address")
    }

    /// Provider transport configuration.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.provider_base_url.clone(),
            api_key: self.provider_api_key.clone(),
            webhook_signing_secret: self.webhook_signing_secret.clone(),
            timeout: Duration::from_secs(self.send_timeout_seconds),
            user_agent: "courier/0.1".to_string(),
        }
    }

    /// Send-queue configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.max_retries,
            backoff: BackoffPolicy {
                base_delay: Duration::from_secs(self.retry_base_delay_seconds),
                max_delay: Duration::from_secs(self.retry_max_delay_seconds),
                multiplier: self.retry_multiplier,
                jitter: self.retry_jitter,
            },
            reset_bounce_retry_budget: self.bounce_retry_resets_budget,
        }
    }

    /// Circuit breaker configuration.
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.breaker_failure_threshold,
            success_threshold: self.breaker_success_threshold,
            reset_timeout: Duration::from_secs(self.breaker_reset_timeout_seconds),
        }
    }

    /// Scheduler configuration.
    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            pending_interval: Duration::from_secs(self.pending_poll_seconds),
            retry_interval: Duration::from_secs(self.retry_poll_seconds),
            bounce_sweep_interval: Duration::from_secs(self.bounce_sweep_seconds),
            bounce_max_age_days: self.bounce_max_age_days,
            retention_days: self.retention_days,
            batch_limit: self.batch_limit,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            anyhow::bail!("retry_jitter must be between 0.0 and 1.0");
        }
        if self.retry_multiplier < 1.0 {
            anyhow::bail!("retry_multiplier must be at least 1.0");
        }
        if self.retry_base_delay_seconds > self.retry_max_delay_seconds {
            anyhow::bail!("retry_base_delay_seconds cannot exceed retry_max_delay_seconds");
        }
        if self.breaker_failure_threshold == 0 {
            anyhow::bail!("breaker_failure_threshold must be greater than 0");
        }
        if self.batch_limit == 0 {
            anyhow::bail!("batch_limit must be greater than 0");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            provider_base_url: default_provider_base_url(),
            provider_api_key: String::new(),
            webhook_signing_secret: String::new(),
            send_timeout_seconds: default_send_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_seconds: default_retry_base_delay(),
            retry_max_delay_seconds: default_retry_max_delay(),
            retry_multiplier: default_retry_multiplier(),
            retry_jitter: default_retry_jitter(),
            bounce_retry_resets_budget: true,
            breaker_failure_threshold: default_failure_threshold(),
            breaker_success_threshold: default_success_threshold(),
            breaker_reset_timeout_seconds: default_breaker_reset_timeout(),
            pending_poll_seconds: default_pending_poll(),
            retry_poll_seconds: default_retry_poll(),
            bounce_sweep_seconds: default_bounce_sweep(),
            bounce_max_age_days: default_bounce_max_age(),
            retention_days: default_retention_days(),
            batch_limit: default_batch_limit(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_provider_base_url() -> String {
    "https://api.mailprovider.example".to_string()
}

fn default_send_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    60
}

fn default_retry_max_delay() -> u64 {
    6 * 60 * 60
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_jitter() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_reset_timeout() -> u64 {
    60
}

fn default_pending_poll() -> u64 {
    15
}

fn default_retry_poll() -> u64 {
    60
}

fn default_bounce_sweep() -> u64 {
    24 * 60 * 60
}

fn default_bounce_max_age() -> u32 {
    7
}

fn default_retention_days() -> u32 {
    90
}

fn default_batch_limit() -> usize {
    50
}

fn default_log_filter() -> String {
    "info,courier=debug".to_string()
}
