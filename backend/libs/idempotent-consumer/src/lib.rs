//! # Idempotent Kafka Consumer Library
//!
//! Duplicate suppression for at-least-once Kafka delivery. A consumer records
//! the `event_id` of every event it handled successfully and skips any later
//! delivery carrying the same ID.
//!
//! ## Problem
//!
//! Kafka redelivers messages whose offsets were not committed:
//! - **Service restarts**: the in-flight message is fetched again
//! - **Rebalances**: a new owner resumes from the last committed offset
//! - **Retries upstream**: a producer re-publishes the same logical event
//!
//! Without a guard the same event creates duplicate notifications, charges, etc.
//!
//! ## Architecture
//!
//! ```text
//! Kafka → Consumer → IdempotentHandler → Business Logic
//!                         ↓
//!                  (contains / add)
//!                         ↓
//!                 IdempotencyStore
//! ```
//!
//! [`IdempotencyStore`] is the seam: [`InMemoryIdempotencyStore`] serves a
//! single consumer process, and a shared external store (Redis, PostgreSQL)
//! can be dropped in behind the same two methods.
//!
//! ## Usage Example
//!
//! ```no_run
//! use idempotent_consumer::{IdempotencyStore, InMemoryIdempotencyStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Keep processed IDs for one hour
//! let store = InMemoryIdempotencyStore::new(Duration::from_secs(3600));
//!
//! if !store.contains("event-123").await? {
//!     // Business logic here
//!     store.add("event-123").await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//!
//! The in-memory store is per process. Two consumer instances in the same
//! consumer group do not see each other's records, so a message moved between
//! them by a rebalance can be processed twice. Deployments with more than one
//! instance must back the trait with a shared store.
//!
//! Expiry is lazy: an entry older than the TTL is removed the next time it is
//! looked up. There is no background sweeper; callers that want to bound
//! memory explicitly can call [`InMemoryIdempotencyStore::purge_expired`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

mod error;

pub use error::{IdempotencyError, IdempotencyResult};

/// Storage for processed event IDs
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Check if an event has already been processed
    ///
    /// - `Ok(true)` if event was already processed
    /// - `Ok(false)` if event has not been processed yet (or its record expired)
    /// - `Err` if the store could not answer
    async fn contains(&self, event_id: &str) -> IdempotencyResult<bool>;

    /// Record an event as processed
    async fn add(&self, event_id: &str) -> IdempotencyResult<()>;
}

#[async_trait]
impl<S: IdempotencyStore + ?Sized> IdempotencyStore for Arc<S> {
    async fn contains(&self, event_id: &str) -> IdempotencyResult<bool> {
        (**self).contains(event_id).await
    }

    async fn add(&self, event_id: &str) -> IdempotencyResult<()> {
        (**self).add(event_id).await
    }
}

/// Thread-safe in-memory store with lazy TTL expiry
///
/// Lookups share a read lock; only insertions and evictions take the write
/// lock.
#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    entries: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

impl InMemoryIdempotencyStore {
    /// Create a store whose records expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of records currently held, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every expired record, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, processed_at| !self.is_expired(*processed_at, now));
        let removed = before - entries.len();

        if removed > 0 {
            debug!(removed = removed, "Purged expired idempotency records");
        }

        removed
    }

    fn is_expired(&self, processed_at: Instant, now: Instant) -> bool {
        now.duration_since(processed_at) > self.ttl
    }

    fn validate_event_id(event_id: &str) -> IdempotencyResult<()> {
        if event_id.is_empty() {
            return Err(IdempotencyError::InvalidEventId(
                "Event ID cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn contains(&self, event_id: &str) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;
        let now = Instant::now();

        {
            let entries = self.entries.read();
            match entries.get(event_id) {
                None => return Ok(false),
                Some(processed_at) if !self.is_expired(*processed_at, now) => return Ok(true),
                Some(_) => {}
            }
        }

        // Expired: evict under the write lock, re-checking in case a writer
        // refreshed the record in between.
        let mut entries = self.entries.write();
        if let Some(processed_at) = entries.get(event_id) {
            if !self.is_expired(*processed_at, now) {
                return Ok(true);
            }
            entries.remove(event_id);
            debug!(event_id = %event_id, "Evicted expired idempotency record");
        }

        Ok(false)
    }

    async fn add(&self, event_id: &str) -> IdempotencyResult<()> {
        Self::validate_event_id(event_id)?;
        self.entries
            .write()
            .insert(event_id.to_string(), Instant::now());
        Ok(())
    }
}
