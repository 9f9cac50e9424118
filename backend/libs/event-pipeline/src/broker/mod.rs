//! Broker client seam
//!
//! The producer, consumer and dead-letter publisher talk to the broker only
//! through [`MessageWriter`] and [`MessageReader`]. [`kafka`] backs them with
//! rdkafka; [`memory`] provides an in-process broker for tests and local runs.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BrokerError;
use crate::message::{InboundMessage, OutboundMessage};

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaReader, KafkaWriter};
pub use memory::{InMemoryBroker, InMemoryReader, InMemoryWriter};

/// Writes records to topics
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Write one record, returning once the broker acknowledged it
    async fn write(&self, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Flush pending writes and release the client
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Reads records for one consumer group with manual offset commits
#[async_trait]
pub trait MessageReader: Send + Sync {
    /// Wait for the next record
    ///
    /// Returns [`BrokerError::Closed`] once the reader has been closed.
    async fn fetch(&self) -> Result<InboundMessage, BrokerError>;

    /// Commit `message` so the group resumes after it
    async fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
impl<W: MessageWriter + ?Sized> MessageWriter for Arc<W> {
    async fn write(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        (**self).write(message).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        (**self).close().await
    }
}

#[async_trait]
impl<R: MessageReader + ?Sized> MessageReader for Arc<R> {
    async fn fetch(&self) -> Result<InboundMessage, BrokerError> {
        (**self).fetch().await
    }

    async fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        (**self).commit(message).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        (**self).close().await
    }
}
