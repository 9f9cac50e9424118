//! rdkafka-backed broker clients

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{MessageReader, MessageWriter};
use crate::config::KafkaConfig;
use crate::error::{BrokerError, MessagingResult};
use crate::message::{InboundMessage, MessageHeader, OutboundMessage};

/// Writer over an idempotent `FutureProducer`
pub struct KafkaWriter {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaWriter {
    /// Wrap an existing producer
    ///
    /// The producer MUST be configured with `enable.idempotence = true` and
    /// `acks = all`; [`KafkaConfig::producer_client_config`] does both.
    pub fn new(producer: FutureProducer, delivery_timeout: Duration) -> Self {
        Self {
            producer,
            delivery_timeout,
        }
    }

    pub fn from_config(config: &KafkaConfig) -> MessagingResult<Self> {
        let producer: FutureProducer = config.producer_client_config().create()?;

        info!(
            brokers = %config.brokers.join(","),
            client_id = %config.client_id,
            "Kafka producer initialized"
        );

        Ok(Self::new(producer, config.delivery_timeout()))
    }
}

#[async_trait]
impl MessageWriter for KafkaWriter {
    async fn write(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut headers = OwnedHeaders::new_with_capacity(message.headers.len());
        for header in &message.headers {
            headers = headers.insert(Header {
                key: &header.key,
                value: Some(header.value.as_slice()),
            });
        }

        let mut record = FutureRecord::<[u8], [u8]>::to(&message.topic)
            .payload(message.payload.as_slice())
            .headers(headers);
        if let Some(key) = &message.key {
            record = record.key(key.as_slice());
        }

        let (partition, offset) = self
            .producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(err, _)| BrokerError::Kafka(err))?;

        debug!(
            topic = %message.topic,
            partition = partition,
            offset = offset,
            "Kafka delivery acknowledged"
        );

        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        let timeout = self.delivery_timeout;

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Unavailable(format!("flush task failed: {}", e)))??;

        Ok(())
    }
}

/// Group member over a `StreamConsumer` with auto-commit disabled
///
/// [`close`](MessageReader::close) wakes a `fetch` waiting in `recv()`, which
/// then returns [`BrokerError::Closed`].
pub struct KafkaReader {
    consumer: StreamConsumer,
    closed: AtomicBool,
    closing: Notify,
}

impl KafkaReader {
    pub fn new(consumer: StreamConsumer) -> Self {
        Self {
            consumer,
            closed: AtomicBool::new(false),
            closing: Notify::new(),
        }
    }

    /// Create a consumer for `config.group_id` subscribed to `topics`
    pub fn from_config(config: &KafkaConfig, topics: &[&str]) -> MessagingResult<Self> {
        let consumer: StreamConsumer = config.consumer_client_config().create()?;
        consumer.subscribe(topics)?;

        info!(
            group_id = %config.group_id,
            topics = ?topics,
            "Kafka consumer subscribed"
        );

        Ok(Self::new(consumer))
    }
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| MessageHeader {
                    key: h.key.to_string(),
                    value: h.value.map(<[u8]>::to_vec).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
    }
}

#[async_trait]
impl MessageReader for KafkaReader {
    async fn fetch(&self) -> Result<InboundMessage, BrokerError> {
        let closing = self.closing.notified();
        tokio::pin!(closing);
        closing.as_mut().enable();

        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        tokio::select! {
            _ = &mut closing => Err(BrokerError::Closed),
            received = self.consumer.recv() => {
                let message = received?;
                Ok(to_inbound(&message))
            }
        }
    }

    async fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        // Kafka stores the offset of the next record to read
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;

        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.closing.notify_waiters();
            self.consumer.unsubscribe();
            info!("Kafka consumer unsubscribed");
        }
        Ok(())
    }
}
