//! Kafka topic naming
//!
//! - `topic("order", "created")` -> `ecommerce.order.created`
//! - `dlq_topic("ecommerce.order.created")` -> `ecommerce.dlq.ecommerce.order.created`

use serde::{Deserialize, Serialize};

/// Prefix for all domain topics
pub const DEFAULT_TOPIC_PREFIX: &str = "ecommerce";

/// Prefix for dead-letter topics
pub const DEFAULT_DLQ_PREFIX: &str = "ecommerce.dlq";

/// Build a domain topic name with the default prefix
pub fn topic(domain: &str, action: &str) -> String {
    TopicNames::default().topic(domain, action)
}

/// Build the dead-letter topic for `original` with the default DLQ prefix
///
/// The original name is appended verbatim, so an empty original yields
/// `ecommerce.dlq.`.
pub fn dlq_topic(original: &str) -> String {
    TopicNames::default().dlq_topic(original)
}

/// Topic naming scheme with configurable prefixes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNames {
    pub prefix: String,
    pub dlq_prefix: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            dlq_prefix: DEFAULT_DLQ_PREFIX.to_string(),
        }
    }
}

impl TopicNames {
    pub fn new(prefix: impl Into<String>, dlq_prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            dlq_prefix: dlq_prefix.into(),
        }
    }

    /// `<prefix>.<domain>.<action>`
    pub fn topic(&self, domain: &str, action: &str) -> String {
        format!("{}.{}.{}", self.prefix, domain, action)
    }

    /// `<dlq_prefix>.<original>`
    pub fn dlq_topic(&self, original: &str) -> String {
        format!("{}.{}", self.dlq_prefix, original)
    }
}
