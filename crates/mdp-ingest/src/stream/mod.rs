//! Continuous kiosk event consumer
//!
//! Runs a fixed-cadence poll loop against a [`MessageSource`] and drives
//! every decoded payload through the shared dispatch path. The consumer is
//! deliberately broker-agnostic; the Kafka binding lives in [`kafka`] and
//! anything implementing [`MessageSource`] can stand in for it under test.
//!
//! Watermark rule: a tick's source position is committed only after every
//! message in the tick has a classified outcome, so a crash replays the
//! tick rather than dropping it. Replays are absorbed downstream as
//! `Duplicate`.

pub mod kafka;

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use mdp_common::types::RawEvent;

use crate::config::StreamConfig;
use crate::pipeline::{RecordDispatcher, ValidationError};

// ============================================================================
// Source abstraction
// ============================================================================

/// A message pulled from the broker, with enough position information to
/// commit the watermark afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("Source configuration error: {0}")]
    Config(String),
}

/// Where the consumer pulls messages from.
#[async_trait::async_trait]
pub trait MessageSource: Send {
    /// Drain whatever is currently available, waiting at most `max_wait`.
    /// An empty vec is a normal quiet tick, not an error.
    async fn fetch(&mut self, max_wait: Duration) -> Result<Vec<SourceMessage>, SourceError>;

    /// Advance the durable position past `up_to`.
    async fn commit(&mut self, up_to: &SourceMessage) -> Result<(), SourceError>;
}

// ============================================================================
// Consumer state machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Polling,
    Decoding,
    Dispatching,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Polling => "polling",
            ConsumerState::Decoding => "decoding",
            ConsumerState::Dispatching => "dispatching",
        }
    }
}

/// Decode a raw broker payload into an event envelope. Anything that is not
/// valid UTF-8 JSON is a per-message failure; it never aborts the tick.
pub fn decode_message(payload: &[u8]) -> Result<RawEvent, ValidationError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| ValidationError::MalformedPayload(e.to_string()))
}

/// Poll-decode-dispatch loop over a [`MessageSource`].
pub struct StreamConsumer<S: MessageSource> {
    source: S,
    dispatcher: Arc<dyn RecordDispatcher>,
    config: StreamConfig,
    state: ConsumerState,
    shutdown: watch::Receiver<bool>,
}

impl<S: MessageSource> StreamConsumer<S> {
    pub fn new(
        source: S,
        dispatcher: Arc<dyn RecordDispatcher>,
        config: StreamConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            config,
            state: ConsumerState::Idle,
            shutdown,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Run until the shutdown flag flips. The tick in flight when the flag
    /// flips finishes and commits before the loop exits.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            topic = %self.config.topic,
            interval_secs = self.config.poll_interval_secs,
            workers = self.config.workers,
            "Stream consumer started"
        );

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Shutdown requested, stopping stream consumer");
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.process_tick().await;
                }
            }
        }

        self.transition(ConsumerState::Idle);
        Ok(())
    }

    /// One poll cycle: fetch, decode, dispatch, commit.
    pub async fn process_tick(&mut self) {
        self.transition(ConsumerState::Polling);
        let max_wait = Duration::from_millis(self.config.fetch_timeout_ms);
        let messages = match self.source.fetch(max_wait).await {
            Ok(messages) => messages,
            Err(e) => {
                // Transient broker trouble: log and wait for the next tick.
                warn!(error = %e, "Fetch failed, will retry next tick");
                self.transition(ConsumerState::Idle);
                return;
            }
        };

        if messages.is_empty() {
            self.transition(ConsumerState::Idle);
            return;
        }

        self.transition(ConsumerState::Decoding);
        let mut decoded = Vec::with_capacity(messages.len());
        for message in &messages {
            match decode_message(&message.payload) {
                Ok(raw) => decoded.push(raw),
                Err(e) => {
                    // A garbled message still advances the watermark; it
                    // would be garbled on replay too.
                    warn!(
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "Discarding undecodable message"
                    );
                }
            }
        }

        self.transition(ConsumerState::Dispatching);
        let dispatched = decoded.len();
        let dispatcher = &self.dispatcher;
        stream::iter(decoded)
            .for_each_concurrent(self.config.workers, |raw| async move {
                dispatcher.dispatch(&raw).await;
            })
            .await;

        // Highest offset in the tick; fetch preserves broker order.
        if let Some(last) = messages.last() {
            if let Err(e) = self.source.commit(last).await {
                warn!(
                    partition = last.partition,
                    offset = last.offset,
                    error = %e,
                    "Failed to commit source position"
                );
            }
        }

        debug!(
            fetched = messages.len(),
            dispatched,
            "Tick complete"
        );
        self.transition(ConsumerState::Idle);
    }

    fn transition(&mut self, next: ConsumerState) {
        if self.state != next {
            debug!(from = self.state.as_str(), to = next.as_str(), "Consumer state change");
            self.state = next;
        }
    }
}
