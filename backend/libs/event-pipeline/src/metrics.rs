//! Prometheus metrics for publishing and consumption
//!
//! Consumer-side series carry `topic` and `consumer_group` labels;
//! producer-side series carry `topic` only.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

const CONSUMER_LABELS: &[&str] = &["topic", "consumer_group"];
const PRODUCER_LABELS: &[&str] = &["topic"];

/// Prometheus instruments shared by the producer, consumer and dead-letter publisher
///
/// Registered into a caller-supplied [`Registry`], so tests and embedded
/// services can keep their own instead of the process-wide default.
#[derive(Clone)]
pub struct MessagingMetrics {
    pub messages_received: IntCounterVec,
    pub messages_processed: IntCounterVec,
    pub messages_failed: IntCounterVec,
    pub messages_duplicate: IntCounterVec,
    pub dlq_published: IntCounterVec,
    pub processing_duration: HistogramVec,
    pub messages_published: IntCounterVec,
    pub publish_errors: IntCounterVec,
    pub publish_duration: HistogramVec,
}

impl MessagingMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_received = IntCounterVec::new(
            Opts::new(
                "messages_received_total",
                "Messages fetched by the consumer",
            ),
            CONSUMER_LABELS,
        )?;

        let messages_processed = IntCounterVec::new(
            Opts::new(
                "messages_processed_total",
                "Messages handled successfully and committed",
            ),
            CONSUMER_LABELS,
        )?;

        let messages_failed = IntCounterVec::new(
            Opts::new(
                "messages_failed_total",
                "Messages that could not be decoded or exhausted handler retries",
            ),
            CONSUMER_LABELS,
        )?;

        let messages_duplicate = IntCounterVec::new(
            Opts::new(
                "messages_duplicate_total",
                "Events skipped because their ID was already processed",
            ),
            CONSUMER_LABELS,
        )?;

        let dlq_published = IntCounterVec::new(
            Opts::new(
                "dlq_published_total",
                "Messages written to a dead-letter topic, by original topic",
            ),
            CONSUMER_LABELS,
        )?;

        let processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "processing_duration_seconds",
                "Handler time for successfully processed messages, including retries",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
            CONSUMER_LABELS,
        )?;

        let messages_published = IntCounterVec::new(
            Opts::new(
                "messages_published_total",
                "Events acknowledged by the broker",
            ),
            PRODUCER_LABELS,
        )?;

        let publish_errors = IntCounterVec::new(
            Opts::new("publish_errors_total", "Events the broker rejected"),
            PRODUCER_LABELS,
        )?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new(
                "publish_duration_seconds",
                "Time from send to broker acknowledgement",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            PRODUCER_LABELS,
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_processed.clone()))?;
        registry.register(Box::new(messages_failed.clone()))?;
        registry.register(Box::new(messages_duplicate.clone()))?;
        registry.register(Box::new(dlq_published.clone()))?;
        registry.register(Box::new(processing_duration.clone()))?;
        registry.register(Box::new(messages_published.clone()))?;
        registry.register(Box::new(publish_errors.clone()))?;
        registry.register(Box::new(publish_duration.clone()))?;

        Ok(Self {
            messages_received,
            messages_processed,
            messages_failed,
            messages_duplicate,
            dlq_published,
            processing_duration,
            messages_published,
            publish_errors,
            publish_duration,
        })
    }

    pub fn record_received(&self, topic: &str, group: &str) {
        self.messages_received
            .with_label_values(&[topic, group])
            .inc();
    }

    pub fn record_processed(&self, topic: &str, group: &str, seconds: f64) {
        self.messages_processed
            .with_label_values(&[topic, group])
            .inc();
        self.processing_duration
            .with_label_values(&[topic, group])
            .observe(seconds);
    }

    pub fn record_failed(&self, topic: &str, group: &str) {
        self.messages_failed.with_label_values(&[topic, group]).inc();
    }

    pub fn record_duplicate(&self, topic: &str, group: &str) {
        self.messages_duplicate
            .with_label_values(&[topic, group])
            .inc();
    }

    pub fn record_dead_lettered(&self, original_topic: &str, group: &str) {
        self.dlq_published
            .with_label_values(&[original_topic, group])
            .inc();
    }

    pub fn record_published(&self, topic: &str, seconds: f64) {
        self.messages_published.with_label_values(&[topic]).inc();
        self.publish_duration
            .with_label_values(&[topic])
            .observe(seconds);
    }

    pub fn record_publish_error(&self, topic: &str) {
        self.publish_errors.with_label_values(&[topic]).inc();
    }
}
