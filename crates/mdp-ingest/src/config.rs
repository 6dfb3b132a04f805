//! Configuration management
//!
//! Each pipeline concern has its own environment-driven section so the batch
//! subcommand never requires broker settings and vice versa. Invalid startup
//! configuration is fatal: it is surfaced immediately and the pipeline does
//! not start.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Stream Configuration Constants
// ============================================================================

/// Default poll cadence for the live feed: one check per second.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

/// Default upper bound on a single broker fetch, in milliseconds.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 750;

/// Default bounded worker count for per-tick dispatch.
pub const DEFAULT_STREAM_WORKERS: usize = 4;

/// Default Kafka consumer group.
pub const DEFAULT_KAFKA_GROUP_ID: &str = "mdp-ingest";

// ============================================================================
// Sink Retry Constants
// ============================================================================

/// Default maximum attempts for a transiently failing write.
pub const DEFAULT_SINK_MAX_ATTEMPTS: u32 = 5;

/// Default base backoff between retry attempts, in milliseconds (doubles per
/// attempt).
pub const DEFAULT_SINK_RETRY_BASE_MS: u64 = 100;

// ============================================================================
// Batch Input Constants
// ============================================================================

/// Default path of the combined exhibition metadata file.
pub const DEFAULT_EXHIBITIONS_PATH: &str = "./data/exhibitions.csv";

/// Default path of the historical kiosk event file.
pub const DEFAULT_EVENTS_PATH: &str = "./data/events.csv";

/// Live-stream consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub poll_interval_secs: u64,
    pub fetch_timeout_ms: u64,
    pub workers: usize,
}

impl StreamConfig {
    /// Load stream configuration from `KAFKA_*` / `STREAM_*` environment
    /// variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let brokers = std::env::var("KAFKA_BROKERS")
            .map_err(|_| anyhow::anyhow!("KAFKA_BROKERS not set"))?;
        let topic =
            std::env::var("KAFKA_TOPIC").map_err(|_| anyhow::anyhow!("KAFKA_TOPIC not set"))?;

        let config = Self {
            brokers,
            topic,
            group_id: std::env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| DEFAULT_KAFKA_GROUP_ID.to_string()),
            sasl_username: std::env::var("KAFKA_SASL_USERNAME").ok(),
            sasl_password: std::env::var("KAFKA_SASL_PASSWORD").ok(),
            poll_interval_secs: std::env::var("STREAM_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            fetch_timeout_ms: std::env::var("STREAM_FETCH_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_MS),
            workers: std::env::var("STREAM_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STREAM_WORKERS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.brokers.is_empty() {
            anyhow::bail!("Kafka broker list cannot be empty");
        }
        if self.topic.is_empty() {
            anyhow::bail!("Kafka topic cannot be empty");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("Stream poll interval must be at least 1 second");
        }
        if self.workers == 0 {
            anyhow::bail!("Stream worker count must be greater than 0");
        }
        // SASL credentials come as a pair or not at all
        if self.sasl_username.is_some() != self.sasl_password.is_some() {
            anyhow::bail!("KAFKA_SASL_USERNAME and KAFKA_SASL_PASSWORD must be set together");
        }
        Ok(())
    }
}

/// Bulk archive input locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPaths {
    pub exhibitions: PathBuf,
    pub events: PathBuf,
}

impl BatchPaths {
    pub fn from_env() -> Self {
        Self {
            exhibitions: std::env::var("BATCH_EXHIBITIONS_PATH")
                .unwrap_or_else(|_| DEFAULT_EXHIBITIONS_PATH.to_string())
                .into(),
            events: std::env::var("BATCH_EVENTS_PATH")
                .unwrap_or_else(|_| DEFAULT_EVENTS_PATH.to_string())
                .into(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.exhibitions.is_file() {
            anyhow::bail!(
                "Exhibition metadata file not found: {}",
                self.exhibitions.display()
            );
        }
        if !self.events.is_file() {
            anyhow::bail!("Event archive file not found: {}", self.events.display());
        }
        Ok(())
    }
}

/// Bounded backoff policy for transient sink failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SINK_MAX_ATTEMPTS,
            base_backoff_ms: DEFAULT_SINK_RETRY_BASE_MS,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        Self {
            max_attempts: std::env::var("SINK_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SINK_MAX_ATTEMPTS),
            base_backoff_ms: std::env::var("SINK_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SINK_RETRY_BASE_MS),
        }
    }

    /// Backoff before the given retry attempt (0-based), doubling per attempt.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64 << attempt.min(8);
        std::time::Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}
