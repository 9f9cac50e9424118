//! Event consumer
//!
//! Fetches messages one at a time, decodes them, runs the handler with
//! bounded retries, dead-letters what cannot be processed, and commits the
//! offset only once the message is resolved (handled or dead-lettered).
//!
//! ```text
//! fetch → decode ──fail──────────────────→ DLQ → commit
//!           │
//!           └→ handle ──ok──→ commit
//!                │
//!                fail → backoff → retry (up to max_attempts) → DLQ → commit
//! ```
//!
//! Processing is sequential, so a message that is being retried holds back
//! every later message of its partition and per-aggregate order is kept.
//! Cancellation during a backoff leaves the message uncommitted; it is
//! redelivered to the next group member.

use event_schema::Event;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::broker::{KafkaReader, KafkaWriter, MessageReader};
use crate::carrier::extract_context;
use crate::config::KafkaConfig;
use crate::dlq::DeadLetterPublisher;
use crate::error::{BrokerError, MessagingError, MessagingResult};
use crate::handler::EventHandler;
use crate::message::{headers, InboundMessage};
use crate::metrics::MessagingMetrics;
use crate::retry::RetryPolicy;

/// Pause after a failed fetch before polling again
pub const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// How a fetched message was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Processed,
    DeadLettered,
    /// Shutdown interrupted processing; the offset was not committed
    Interrupted,
}

pub struct EventConsumer {
    reader: Arc<dyn MessageReader>,
    handler: Arc<dyn EventHandler>,
    dead_letter: Option<DeadLetterPublisher>,
    metrics: Arc<MessagingMetrics>,
    group_id: String,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl EventConsumer {
    pub fn new(
        reader: Arc<dyn MessageReader>,
        handler: Arc<dyn EventHandler>,
        group_id: impl Into<String>,
        metrics: Arc<MessagingMetrics>,
    ) -> Self {
        Self {
            reader,
            handler,
            dead_letter: None,
            metrics,
            group_id: group_id.into(),
            retry: RetryPolicy::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Consumer for `config.group_id` over `topics`, dead-lettering through
    /// its own Kafka producer
    pub fn from_config(
        config: &KafkaConfig,
        topics: &[&str],
        handler: Arc<dyn EventHandler>,
        metrics: Arc<MessagingMetrics>,
    ) -> MessagingResult<Self> {
        let reader = KafkaReader::from_config(config, topics)?;
        let dlq_writer = KafkaWriter::from_config(config)?;
        let dead_letter =
            DeadLetterPublisher::new(Arc::new(dlq_writer), config.topic_names(), metrics.clone());

        Ok(Self::new(Arc::new(reader), handler, config.group_id.clone(), metrics)
            .with_dead_letter(dead_letter))
    }

    /// Route unprocessable messages through `publisher`
    ///
    /// The consumer owns the publisher and closes it on [`close`](Self::close).
    /// Without one, such messages are logged and committed.
    pub fn with_dead_letter(mut self, publisher: DeadLetterPublisher) -> Self {
        self.dead_letter = Some(publisher);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        };
        self
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Run the fetch loop until `shutdown` is cancelled or the reader closes
    ///
    /// Fetch errors are logged and retried after a short pause. Cancellation
    /// always ends the loop with `Ok(())`.
    pub async fn start(&self, shutdown: CancellationToken) -> MessagingResult<()> {
        info!(group_id = %self.group_id, "Event consumer started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fetched = self.reader.fetch() => fetched,
            };

            let message = match fetched {
                Ok(message) => message,
                Err(BrokerError::Closed) => {
                    info!(group_id = %self.group_id, "Reader closed");
                    break;
                }
                Err(e) => {
                    error!(group_id = %self.group_id, error = %e, "Failed to fetch message");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_ERROR_BACKOFF) => continue,
                    }
                }
            };

            if self.process(message, &shutdown).await == Disposition::Interrupted {
                break;
            }
        }

        info!(group_id = %self.group_id, "Event consumer stopped");
        Ok(())
    }

    async fn process(&self, message: InboundMessage, shutdown: &CancellationToken) -> Disposition {
        let span = info_span!(
            "kafka.consume",
            otel.kind = "consumer",
            messaging.system = "kafka",
            messaging.destination = %message.topic,
            messaging.consumer_group = %self.group_id,
            messaging.kafka.partition = message.partition,
            messaging.kafka.offset = message.offset,
            event_type = message.header(headers::EVENT_TYPE).unwrap_or("unknown"),
            otel.status_code = Empty,
        );
        span.set_parent(extract_context(&message.headers));

        let disposition = self
            .process_in_span(&message, shutdown)
            .instrument(span.clone())
            .await;

        if disposition == Disposition::DeadLettered {
            span.record("otel.status_code", "ERROR");
        }

        disposition
    }

    async fn process_in_span(
        &self,
        message: &InboundMessage,
        shutdown: &CancellationToken,
    ) -> Disposition {
        self.metrics.record_received(&message.topic, &self.group_id);

        let event = match Event::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                let err = MessagingError::from(e);
                self.metrics.record_failed(&message.topic, &self.group_id);
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "Undecodable message, dead-lettering without retry"
                );
                self.dead_letter(message, &err.to_string()).await;
                self.commit(message).await;
                return Disposition::DeadLettered;
            }
        };

        let start = Instant::now();
        let mut attempt = 0;

        let last_error = loop {
            attempt += 1;

            match self.handler.handle(&event).await {
                Ok(()) => {
                    self.metrics.record_processed(
                        &message.topic,
                        &self.group_id,
                        start.elapsed().as_secs_f64(),
                    );
                    debug!(
                        event_id = %event.event_id,
                        attempt = attempt,
                        "Event processed"
                    );
                    self.commit(message).await;
                    return Disposition::Processed;
                }
                Err(e) if attempt >= self.retry.max_attempts => break e,
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        event_id = %event.event_id,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %format!("{:#}", e),
                        "Handler failed, retrying"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            info!(
                                event_id = %event.event_id,
                                offset = message.offset,
                                "Shutdown during retry backoff, leaving message uncommitted"
                            );
                            return Disposition::Interrupted;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        let err = MessagingError::Handler(format!("{:#}", last_error));
        self.metrics.record_failed(&message.topic, &self.group_id);
        error!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            attempts = attempt,
            error = %err,
            "Handler retries exhausted, dead-lettering"
        );

        self.dead_letter(message, &format!("{:#}", last_error)).await;
        self.commit(message).await;
        Disposition::DeadLettered
    }

    // A failed dead-letter write is logged and the offset is still committed,
    // so the message is lost. Stalling the partition on a broken DLQ is the
    // alternative.
    async fn dead_letter(&self, message: &InboundMessage, reason: &str) {
        match &self.dead_letter {
            Some(publisher) => {
                if let Err(e) = publisher.publish(message, reason, &self.group_id).await {
                    error!(
                        topic = %message.topic,
                        offset = message.offset,
                        error = %e,
                        "Dead-letter publish failed, committing anyway"
                    );
                }
            }
            None => {
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    reason = %reason,
                    "No dead-letter publisher configured, dropping message"
                );
            }
        }
    }

    async fn commit(&self, message: &InboundMessage) {
        if let Err(e) = self.reader.commit(message).await {
            let err = MessagingError::Commit(e);
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "Failed to commit offset"
            );
        }
    }

    /// Close the reader and the dead-letter publisher
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub async fn close(&self) -> MessagingResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let reader_result = self.reader.close().await;

        if let Some(publisher) = &self.dead_letter {
            if let Err(e) = publisher.close().await {
                warn!(error = %e, "Failed to close dead-letter publisher");
            }
        }

        info!(group_id = %self.group_id, "Event consumer closed");
        reader_result.map_err(MessagingError::from)
    }
}
