//! # Event Pipeline
//!
//! At-least-once event publishing and consumption over Kafka.
//!
//! - [`EventProducer`] publishes [`Event`]s keyed by aggregate ID, so all
//!   events of one aggregate stay ordered on a single partition.
//! - [`EventConsumer`] processes messages sequentially with bounded retries,
//!   routes unprocessable messages to a dead-letter topic, and commits an
//!   offset only after its message is resolved.
//! - [`IdempotentHandler`] suppresses redelivered events by `event_id`.
//! - Trace context travels in W3C `traceparent`/`tracestate` headers, so a
//!   consumer's span joins the producer's trace.
//!
//! ## Usage Example
//!
//! ```no_run
//! use event_pipeline::{
//!     handler_fn, EventConsumer, EventProducer, IdempotentHandler, KafkaConfig,
//!     MessagingMetrics,
//! };
//! use event_schema::Event;
//! use idempotent_consumer::InMemoryIdempotencyStore;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = KafkaConfig::from_env();
//!     let metrics = Arc::new(MessagingMetrics::new(prometheus::default_registry())?);
//!     let topic = config.topic_names().topic("order", "created");
//!
//!     let producer = EventProducer::from_config(&config, metrics.clone())?;
//!     producer.ping().await?;
//!
//!     let event = Event::new(
//!         "order.created",
//!         "order-42",
//!         "order",
//!         "order-service",
//!         &serde_json::json!({"total_cents": 1999}),
//!     )?;
//!     producer.publish(&topic, &event).await?;
//!
//!     let handler = IdempotentHandler::new(
//!         handler_fn(|event| async move {
//!             tracing::info!(event_id = %event.event_id, "Reserving stock");
//!             Ok(())
//!         }),
//!         InMemoryIdempotencyStore::new(config.idempotency_ttl()),
//!     )
//!     .with_metrics(metrics.clone(), &topic, &config.group_id);
//!
//!     let consumer =
//!         EventConsumer::from_config(&config, &[topic.as_str()], Arc::new(handler), metrics)?;
//!
//!     let shutdown = CancellationToken::new();
//!     consumer.start(shutdown).await?;
//!     consumer.close().await?;
//!     producer.close().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod carrier;
pub mod config;
pub mod consumer;
pub mod dlq;
mod error;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod retry;

pub use broker::{InMemoryBroker, MessageReader, MessageWriter};
pub use carrier::{extract_context, inject_context, HeaderCarrier, HeaderExtractor};
pub use config::KafkaConfig;
pub use consumer::EventConsumer;
pub use dlq::DeadLetterPublisher;
pub use error::{BrokerError, MessagingError, MessagingResult};
pub use handler::{handler_fn, EventHandler, FnHandler, IdempotentHandler};
pub use message::{headers, InboundMessage, MessageHeader, OutboundMessage};
pub use metrics::MessagingMetrics;
pub use producer::EventProducer;
pub use retry::RetryPolicy;

pub use event_schema::Event;
