//! Kafka binding for the stream consumer
//!
//! Offsets are committed manually through [`MessageSource::commit`] so the
//! durable position only moves once a tick has fully dispatched. Auto-commit
//! stays off for the same reason.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer as RdKafkaConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use crate::config::StreamConfig;

use super::{MessageSource, SourceError, SourceMessage};

/// Cap on messages drained per tick, so one busy tick cannot starve the
/// commit that follows it.
const MAX_FETCH_BATCH: usize = 500;

impl From<KafkaError> for SourceError {
    fn from(e: KafkaError) -> Self {
        SourceError::Broker(e.to_string())
    }
}

/// [`MessageSource`] backed by a Kafka consumer group.
pub struct KafkaSource {
    consumer: RdKafkaConsumer,
    topic: String,
}

impl KafkaSource {
    /// Build the consumer and subscribe. Credentials come as a pair; the
    /// config layer rejects a half-set pair before this runs.
    pub fn connect(config: &StreamConfig) -> Result<Self, SourceError> {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "45000");

        if let (Some(username), Some(password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: RdKafkaConsumer = client
            .create()
            .map_err(|e| SourceError::Config(format!("Failed to create consumer: {e}")))?;
        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| SourceError::Config(format!("Failed to subscribe: {e}")))?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group = %config.group_id,
            "Connected to Kafka"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait::async_trait]
impl MessageSource for KafkaSource {
    async fn fetch(&mut self, max_wait: Duration) -> Result<Vec<SourceMessage>, SourceError> {
        let deadline = Instant::now() + max_wait;
        let mut messages = Vec::new();

        while messages.len() < MAX_FETCH_BATCH {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(borrowed)) => {
                    let payload = borrowed.payload().unwrap_or_default().to_vec();
                    messages.push(SourceMessage {
                        payload,
                        partition: borrowed.partition(),
                        offset: borrowed.offset(),
                    });
                }
            }
        }

        if !messages.is_empty() {
            debug!(count = messages.len(), "Fetched messages");
        }
        Ok(messages)
    }

    async fn commit(&mut self, up_to: &SourceMessage) -> Result<(), SourceError> {
        let mut positions = TopicPartitionList::new();
        positions.add_partition_offset(
            &self.topic,
            up_to.partition,
            Offset::Offset(up_to.offset + 1),
        )?;
        self.consumer.commit(&positions, CommitMode::Async)?;
        Ok(())
    }
}
