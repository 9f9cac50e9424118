//! Kafka client configuration

use event_schema::{TopicNames, DEFAULT_DLQ_PREFIX, DEFAULT_TOPIC_PREFIX};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and naming settings shared by producers and consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap servers, `host:port`
    pub brokers: Vec<String>,

    /// Consumer group ID
    pub group_id: String,

    pub client_id: String,

    /// Prefix for domain topics (`<prefix>.<domain>.<action>`)
    pub topic_prefix: String,

    /// Prefix for dead-letter topics (`<dlq_prefix>.<original topic>`)
    pub dlq_prefix: String,

    /// How long a publish may wait for broker acknowledgement
    pub delivery_timeout_ms: u64,

    pub session_timeout_ms: u64,

    /// Where a group with no committed offset starts: `earliest` or `latest`
    pub auto_offset_reset: String,

    /// How long processed event IDs are remembered
    pub idempotency_ttl_secs: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            group_id: "event-pipeline".to_string(),
            client_id: "event-pipeline".to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            dlq_prefix: DEFAULT_DLQ_PREFIX.to_string(),
            delivery_timeout_ms: 30_000,
            session_timeout_ms: 45_000,
            auto_offset_reset: "earliest".to_string(),
            idempotency_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl KafkaConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `KAFKA_BROKERS`: Comma-separated bootstrap servers (default: localhost:9092)
    /// - `KAFKA_CONSUMER_GROUP`: Consumer group ID
    /// - `KAFKA_CLIENT_ID`: Client ID reported to the brokers
    /// - `KAFKA_TOPIC_PREFIX`: Domain topic prefix (default: ecommerce)
    /// - `KAFKA_DLQ_PREFIX`: Dead-letter topic prefix (default: ecommerce.dlq)
    /// - `KAFKA_DELIVERY_TIMEOUT_MS`: Publish acknowledgement timeout
    /// - `KAFKA_SESSION_TIMEOUT_MS`: Consumer session timeout
    /// - `KAFKA_AUTO_OFFSET_RESET`: `earliest` or `latest`
    /// - `IDEMPOTENCY_TTL_SECS`: Retention of processed event IDs
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let brokers = std::env::var("KAFKA_BROKERS")
            .ok()
            .map(|v| parse_brokers(&v))
            .filter(|brokers| !brokers.is_empty())
            .unwrap_or(defaults.brokers);

        Self {
            brokers,
            group_id: std::env::var("KAFKA_CONSUMER_GROUP").unwrap_or(defaults.group_id),
            client_id: std::env::var("KAFKA_CLIENT_ID").unwrap_or(defaults.client_id),
            topic_prefix: std::env::var("KAFKA_TOPIC_PREFIX").unwrap_or(defaults.topic_prefix),
            dlq_prefix: std::env::var("KAFKA_DLQ_PREFIX").unwrap_or(defaults.dlq_prefix),
            delivery_timeout_ms: env_u64("KAFKA_DELIVERY_TIMEOUT_MS")
                .unwrap_or(defaults.delivery_timeout_ms),
            session_timeout_ms: env_u64("KAFKA_SESSION_TIMEOUT_MS")
                .unwrap_or(defaults.session_timeout_ms),
            auto_offset_reset: std::env::var("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.auto_offset_reset),
            idempotency_ttl_secs: env_u64("IDEMPOTENCY_TTL_SECS")
                .unwrap_or(defaults.idempotency_ttl_secs),
        }
    }

    pub fn topic_names(&self) -> TopicNames {
        TopicNames::new(self.topic_prefix.clone(), self.dlq_prefix.clone())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    /// Producer settings: idempotent, fully acknowledged writes
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("client.id", &self.client_id)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("compression.type", "lz4")
            .set("linger.ms", "10")
            .set("message.timeout.ms", self.delivery_timeout_ms.to_string());
        config
    }

    /// Consumer settings: group membership with manual offset commits
    pub fn consumer_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", &self.group_id)
            .set("client.id", &self.client_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false");
        config
    }
}

fn parse_brokers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
