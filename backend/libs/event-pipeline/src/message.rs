//! Broker-neutral message shapes and well-known header names.

/// Header names written by the producer and the dead-letter publisher.
pub mod headers {
    pub const EVENT_TYPE: &str = "event_type";
    pub const SOURCE: &str = "source";
    pub const CORRELATION_ID: &str = "correlation_id";

    pub const DLQ_ORIGINAL_TOPIC: &str = "dlq.original_topic";
    pub const DLQ_ORIGINAL_PARTITION: &str = "dlq.original_partition";
    pub const DLQ_ORIGINAL_OFFSET: &str = "dlq.original_offset";
    pub const DLQ_CONSUMER_GROUP: &str = "dlq.consumer_group";
    pub const DLQ_ERROR: &str = "dlq.error";
}

/// A single Kafka record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub key: String,
    pub value: Vec<u8>,
}

impl MessageHeader {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A record about to be written to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Partition key; records sharing a key land on the same partition
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Vec<MessageHeader>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(MessageHeader::new(key, value));
        self
    }
}

/// A record fetched from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Vec<MessageHeader>,
}

impl InboundMessage {
    /// First header named `key`, if its value is UTF-8
    pub fn header(&self, key: &str) -> Option<&str> {
        header_str(&self.headers, key)
    }
}

pub(crate) fn header_str<'a>(headers: &'a [MessageHeader], key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.key == key)
        .and_then(|h| std::str::from_utf8(&h.value).ok())
}
