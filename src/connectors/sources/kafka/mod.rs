// Copyright 2025
// Licensed under the Elastic License v2.0

//! Kafka CDC source
//!
//! Consumes Debezium change events from every topic matching a regex and
//! hands them to the pipeline one at a time.
//!
//! ```text
//! Kafka topics --> StreamConsumer --> EnvelopeDecoder --> SourceEvent
//!                        ^                  |
//!                        |            (schema registry)
//!                  commit(offsets) <-- Pipeline
//! ```
//!
//! With `ACK_MODE=before_flush` librdkafka auto-commits in the background
//! and `commit` is never called. With `after_flush` auto-commit is off and
//! the pipeline commits the offsets whose rows reached the sink.

mod context;
pub mod decoder;
pub mod schema_registry;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::{Source, SourceEvent, SourcePosition};
use crate::pipeline::AckMode;
use crate::routing::table_from_topic;

pub use self::context::LoggingConsumerContext;
pub use self::decoder::{AvroEnvelopeDecoder, EnvelopeDecoder, JsonEnvelopeDecoder};
pub use self::schema_registry::SchemaRegistryClient;

/// Owned copy of a consumed message
struct ReceivedMessage {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
}

pub struct KafkaSource {
    consumer: StreamConsumer<LoggingConsumerContext>,
    decoder: Box<dyn EnvelopeDecoder>,
    subscription: String,
}

impl KafkaSource {
    /// Creates the consumer and subscribes to the topic pattern.
    pub fn new(config: &SourceConfig, decoder: Box<dyn EnvelopeDecoder>) -> Result<Self> {
        let consumer: StreamConsumer<LoggingConsumerContext> = client_config(config)
            .create_with_context(LoggingConsumerContext::default())
            .context("Failed to create Kafka consumer")?;

        let subscription = subscription_pattern(&config.topics_regex);
        consumer
            .subscribe(&[subscription.as_str()])
            .with_context(|| format!("Failed to subscribe to {}", subscription))?;

        info!("KafkaSource initialized:");
        info!("  Brokers: {}", config.bootstrap_servers);
        info!("  Group: {}", config.group_id);
        info!("  Subscription: {}", subscription);
        info!("  Decoder: {}", decoder.name());

        Ok(Self {
            consumer,
            decoder,
            subscription,
        })
    }
}

/// librdkafka settings for the consumer group.
fn client_config(config: &SourceConfig) -> ClientConfig {
    let auto_commit = match config.ack_mode {
        AckMode::BeforeFlush => "true",
        AckMode::AfterFlush => "false",
    };

    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", &config.group_id)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", auto_commit)
        .set("enable.partition.eof", "false");
    client
}

/// librdkafka treats a subscription as a regex only when it starts with `^`.
fn subscription_pattern(regex: &str) -> String {
    if regex.starts_with('^') {
        regex.to_string()
    } else {
        format!("^{}", regex)
    }
}

#[async_trait]
impl Source for KafkaSource {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<SourceEvent>> {
        let received = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(anyhow::Error::new(e).context("Kafka consumer error")),
            Ok(Ok(msg)) => ReceivedMessage {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                key: msg.key().map(<[u8]>::to_vec),
                payload: msg.payload().map(<[u8]>::to_vec),
            },
        };

        let position = SourcePosition::new(received.topic.clone(), received.partition, received.offset);

        let Some(payload) = received.payload else {
            return Ok(Some(SourceEvent::Tombstone { position }));
        };

        let table = table_from_topic(&received.topic);
        let event = match self
            .decoder
            .decode(table, received.key.as_deref(), &payload)
            .await
        {
            Ok(envelope) => SourceEvent::Envelope { envelope, position },
            Err(e) => SourceEvent::Malformed {
                position,
                reason: e.to_string(),
            },
        };
        Ok(Some(event))
    }

    async fn commit(&mut self, positions: &[SourcePosition]) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        for position in positions {
            tpl.add_partition_offset(&position.topic, position.partition, Offset::Offset(position.offset))
                .with_context(|| format!("Invalid commit position {}", position))?;
        }
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .context("Failed to commit offsets")?;
        debug!("Requested commit for {} partitions", positions.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        info!(
            subscription = %self.subscription,
            rebalances = self.consumer.context().rebalance_count(),
            "Kafka source closed"
        );
        Ok(())
    }
}
