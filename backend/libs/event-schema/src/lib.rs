//! Event envelope shared by every producer and consumer on the event bus
//!
//! The envelope carries identity, routing and tracing metadata around an
//! opaque JSON payload. The pipeline never depends on business schemas:
//! callers encode their own type on publish and decode it again on consume.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

mod error;
pub mod topics;

pub use error::{EventError, EventResult};
pub use topics::{dlq_topic, topic, TopicNames, DEFAULT_DLQ_PREFIX, DEFAULT_TOPIC_PREFIX};

/// Current payload schema version for newly created events
pub const SCHEMA_VERSION: u32 = 1;

fn default_version() -> u32 {
    SCHEMA_VERSION
}

/// Domain event as it travels over Kafka
///
/// `event_id` is the only identity used for deduplication. Two events with
/// different IDs are distinct even if everything else matches, so a caller
/// retrying the same logical occurrence must reuse the original event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID (idempotency key)
    #[serde(default)]
    pub event_id: String,
    /// Dot-namespaced type, e.g. `order.created`
    pub event_type: String,
    /// Business entity this event describes; used as the partition key
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// Payload schema version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Creation time (not a total order across partitions)
    pub timestamp: DateTime<Utc>,
    /// Producing service
    pub source: String,
    /// Links causally related events and requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Opaque payload
    pub data: serde_json::Value,
    /// Free-form extension map
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Build a new event around `payload`
    ///
    /// Fails with [`EventError::Serialization`] if the payload cannot be
    /// represented as JSON (for example a map keyed by non-string values).
    pub fn new<T: Serialize + ?Sized>(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        source: impl Into<String>,
        payload: &T,
    ) -> EventResult<Self> {
        let data = serde_json::to_value(payload).map_err(EventError::Serialization)?;

        Ok(Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
            data,
            metadata: HashMap::new(),
        })
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Encode the full envelope as JSON bytes
    pub fn to_bytes(&self) -> EventResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(EventError::Serialization)
    }

    /// Decode an envelope from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> EventResult<Self> {
        serde_json::from_slice(bytes).map_err(EventError::Decode)
    }

    /// Decode the payload into the caller's type
    pub fn decode_data<T: DeserializeOwned>(&self) -> EventResult<T> {
        T::deserialize(&self.data).map_err(EventError::Decode)
    }

    /// Whether this event carries an identity usable for deduplication
    pub fn has_id(&self) -> bool {
        !self.event_id.is_empty()
    }
}
