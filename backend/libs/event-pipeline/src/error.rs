//! Error types for the event pipeline.

use event_schema::EventError;
use idempotent_consumer::IdempotencyError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type MessagingResult<T> = Result<T, MessagingError>;

/// Failures reported by a broker client (Kafka or in-memory).
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The client was closed; no further messages will be returned
    #[error("Broker client closed")]
    Closed,

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the producer, consumer and dead-letter publisher.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Event could not be encoded to JSON
    #[error("Serialization error: {0}")]
    Serialization(#[source] EventError),

    /// Message payload was not a valid event envelope
    #[error("Decode error: {0}")]
    Decode(#[source] EventError),

    #[error("Publish to {topic} failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: BrokerError,
    },

    /// No configured broker accepted a TCP connection
    #[error("No broker reachable (tried {0:?})")]
    BrokerUnreachable(Vec<String>),

    /// Handler gave up after exhausting its attempts
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Idempotency store unavailable: {0}")]
    StoreUnavailable(#[from] IdempotencyError),

    #[error("Offset commit failed: {0}")]
    Commit(#[source] BrokerError),

    #[error("Dead-letter publish to {topic} failed: {source}")]
    DlqPublish {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Client could not be created from configuration
    #[error("Kafka client error: {0}")]
    Client(#[from] rdkafka::error::KafkaError),
}

impl From<EventError> for MessagingError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Serialization(_) => MessagingError::Serialization(err),
            EventError::Decode(_) => MessagingError::Decode(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_schema::Event;

    #[test]
    fn test_event_errors_keep_their_kind() {
        let err: MessagingError = Event::from_slice(b"not json").unwrap_err().into();
        assert!(matches!(err, MessagingError::Decode(_)));
        assert!(err.to_string().starts_with("Decode error"));
    }

    #[test]
    fn test_publish_error_names_topic() {
        let err = MessagingError::Publish {
            topic: "ecommerce.order.created".to_string(),
            source: BrokerError::Unavailable("connection refused".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("ecommerce.order.created"));
        assert!(message.contains("connection refused"));
    }
}
