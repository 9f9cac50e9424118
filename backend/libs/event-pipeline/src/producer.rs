//! Event producer
//!
//! Serializes [`Event`]s, keys them by `aggregate_id` so every event of one
//! aggregate lands on the same partition, and carries the caller's trace
//! context in the record headers.

use event_schema::Event;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::field::{display, Empty};
use tracing::{debug, error, info, info_span, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::broker::{KafkaWriter, MessageWriter};
use crate::carrier::inject_context;
use crate::config::KafkaConfig;
use crate::error::{MessagingError, MessagingResult};
use crate::message::{headers, MessageHeader, OutboundMessage};
use crate::metrics::MessagingMetrics;

/// Per-broker TCP dial timeout used by [`EventProducer::ping`]
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EventProducer {
    writer: Arc<dyn MessageWriter>,
    brokers: Vec<String>,
    metrics: Arc<MessagingMetrics>,
    ping_timeout: Duration,
}

impl EventProducer {
    pub fn new(
        writer: Arc<dyn MessageWriter>,
        brokers: Vec<String>,
        metrics: Arc<MessagingMetrics>,
    ) -> Self {
        Self {
            writer,
            brokers,
            metrics,
            ping_timeout: PING_TIMEOUT,
        }
    }

    /// Producer over an idempotent Kafka client built from `config`
    pub fn from_config(config: &KafkaConfig, metrics: Arc<MessagingMetrics>) -> MessagingResult<Self> {
        let writer = KafkaWriter::from_config(config)?;
        Ok(Self::new(Arc::new(writer), config.brokers.clone(), metrics))
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Publish `event` to `topic`, returning once the broker acknowledged it
    ///
    /// Runs inside a producer span whose context is injected into the
    /// record headers.
    pub async fn publish(&self, topic: &str, event: &Event) -> MessagingResult<()> {
        let span = info_span!(
            "kafka.publish",
            otel.kind = "producer",
            messaging.system = "kafka",
            messaging.destination = %topic,
            event_type = %event.event_type,
            event_id = %event.event_id,
            otel.status_code = Empty,
            error = Empty,
        );

        let result = self
            .publish_in_span(topic, event)
            .instrument(span.clone())
            .await;

        if let Err(e) = &result {
            span.record("otel.status_code", "ERROR");
            span.record("error", display(e));
        }

        result
    }

    async fn publish_in_span(&self, topic: &str, event: &Event) -> MessagingResult<()> {
        let payload = event.to_bytes()?;

        let mut message_headers = vec![
            MessageHeader::new(headers::EVENT_TYPE, event.event_type.as_str()),
            MessageHeader::new(headers::SOURCE, event.source.as_str()),
        ];
        if let Some(correlation_id) = &event.correlation_id {
            message_headers.push(MessageHeader::new(
                headers::CORRELATION_ID,
                correlation_id.as_str(),
            ));
        }
        inject_context(&Span::current().context(), &mut message_headers);

        let message = OutboundMessage {
            topic: topic.to_string(),
            key: Some(event.aggregate_id.clone().into_bytes()),
            payload,
            headers: message_headers,
        };

        let start = Instant::now();
        match self.writer.write(message).await {
            Ok(()) => {
                self.metrics
                    .record_published(topic, start.elapsed().as_secs_f64());
                debug!(
                    topic = %topic,
                    event_id = %event.event_id,
                    aggregate_id = %event.aggregate_id,
                    "Event published"
                );
                Ok(())
            }
            Err(source) => {
                self.metrics.record_publish_error(topic);
                error!(
                    topic = %topic,
                    event_id = %event.event_id,
                    error = %source,
                    "Failed to publish event"
                );
                Err(MessagingError::Publish {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }

    /// Publish each event in order, continuing past failures
    ///
    /// Returns `(succeeded, failed)` counts.
    pub async fn publish_batch(&self, topic: &str, events: &[Event]) -> (usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;

        for event in events {
            match self.publish(topic, event).await {
                Ok(()) => succeeded += 1,
                Err(_) => failed += 1,
            }
        }

        if failed > 0 {
            info!(
                topic = %topic,
                succeeded = succeeded,
                failed = failed,
                "Batch publish completed with failures"
            );
        }

        (succeeded, failed)
    }

    /// Succeeds as soon as one configured broker accepts a TCP connection
    ///
    /// Brokers are tried in configuration order, each with its own timeout.
    pub async fn ping(&self) -> MessagingResult<()> {
        for broker in &self.brokers {
            match tokio::time::timeout(self.ping_timeout, TcpStream::connect(broker.as_str())).await
            {
                Ok(Ok(_)) => {
                    debug!(broker = %broker, "Broker reachable");
                    return Ok(());
                }
                Ok(Err(e)) => debug!(broker = %broker, error = %e, "Broker dial failed"),
                Err(_) => debug!(broker = %broker, "Broker dial timed out"),
            }
        }

        Err(MessagingError::BrokerUnreachable(self.brokers.clone()))
    }

    /// Flush pending writes and release the client
    pub async fn close(&self) -> MessagingResult<()> {
        self.writer.close().await?;
        info!("Event producer closed");
        Ok(())
    }
}
