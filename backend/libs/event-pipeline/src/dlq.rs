//! Dead-letter publishing
//!
//! A message that cannot be processed is copied verbatim (key, payload and
//! headers) to `<dlq_prefix>.<original topic>`, with diagnostic headers
//! appended so it can be inspected and replayed later.

use event_schema::TopicNames;
use std::sync::Arc;
use tracing::{error, info};

use crate::broker::MessageWriter;
use crate::error::{MessagingError, MessagingResult};
use crate::message::{headers, InboundMessage, MessageHeader, OutboundMessage};
use crate::metrics::MessagingMetrics;

pub struct DeadLetterPublisher {
    writer: Arc<dyn MessageWriter>,
    topics: TopicNames,
    metrics: Arc<MessagingMetrics>,
}

impl DeadLetterPublisher {
    pub fn new(
        writer: Arc<dyn MessageWriter>,
        topics: TopicNames,
        metrics: Arc<MessagingMetrics>,
    ) -> Self {
        Self {
            writer,
            topics,
            metrics,
        }
    }

    /// Dead-letter topic for `original_topic`
    pub fn topic_for(&self, original_topic: &str) -> String {
        self.topics.dlq_topic(original_topic)
    }

    /// Copy `original` to its dead-letter topic, tagged with `reason`
    pub async fn publish(
        &self,
        original: &InboundMessage,
        reason: &str,
        consumer_group: &str,
    ) -> MessagingResult<()> {
        let topic = self.topic_for(&original.topic);
        let message = dead_letter_message(topic.clone(), original, reason, consumer_group);

        if let Err(source) = self.writer.write(message).await {
            error!(
                dlq_topic = %topic,
                original_topic = %original.topic,
                partition = original.partition,
                offset = original.offset,
                error = %source,
                "Failed to publish message to dead-letter topic"
            );
            return Err(MessagingError::DlqPublish { topic, source });
        }

        self.metrics
            .record_dead_lettered(&original.topic, consumer_group);

        info!(
            dlq_topic = %topic,
            original_topic = %original.topic,
            partition = original.partition,
            offset = original.offset,
            reason = %reason,
            "Message sent to dead-letter topic"
        );

        Ok(())
    }

    pub async fn close(&self) -> MessagingResult<()> {
        self.writer.close().await?;
        Ok(())
    }
}

fn dead_letter_message(
    topic: String,
    original: &InboundMessage,
    reason: &str,
    consumer_group: &str,
) -> OutboundMessage {
    let mut message_headers = original.headers.clone();
    message_headers.extend([
        MessageHeader::new(headers::DLQ_ORIGINAL_TOPIC, original.topic.as_str()),
        MessageHeader::new(
            headers::DLQ_ORIGINAL_PARTITION,
            original.partition.to_string(),
        ),
        MessageHeader::new(headers::DLQ_ORIGINAL_OFFSET, original.offset.to_string()),
        MessageHeader::new(headers::DLQ_CONSUMER_GROUP, consumer_group),
        MessageHeader::new(headers::DLQ_ERROR, reason),
    ]);

    OutboundMessage {
        topic,
        key: original.key.clone(),
        payload: original.payload.clone(),
        headers: message_headers,
    }
}
