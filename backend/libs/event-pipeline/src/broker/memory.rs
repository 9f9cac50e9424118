//! In-process broker
//!
//! Models the parts of Kafka the pipeline depends on: keyed partitioning,
//! per-partition ordering, per-group committed offsets, and redelivery of
//! uncommitted records to a new group member. Writes to selected topics,
//! fetches and commits can be made to fail for exercising error paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use super::{MessageReader, MessageWriter};
use crate::error::BrokerError;
use crate::message::{InboundMessage, OutboundMessage};

pub const DEFAULT_PARTITIONS: usize = 4;

#[derive(Default)]
struct BrokerState {
    /// topic -> partition -> log
    topics: HashMap<String, Vec<Vec<InboundMessage>>>,
    /// (group, topic, partition) -> next offset to read
    committed: HashMap<(String, String, i32), i64>,
    failing_topics: HashSet<String>,
    /// Fetches left to fail, across every reader
    failing_fetches: usize,
    fail_commits: bool,
}

struct Shared {
    partitions: usize,
    state: Mutex<BrokerState>,
    appended: Notify,
}

/// Cloneable handle to an in-process broker
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(BrokerState::default()),
                appended: Notify::new(),
            }),
        }
    }

    pub fn partitions(&self) -> usize {
        self.shared.partitions
    }

    pub fn writer(&self) -> InMemoryWriter {
        InMemoryWriter {
            broker: self.clone(),
        }
    }

    /// Join `group` and read `topics`, starting from the group's committed offsets
    pub fn reader(&self, group: &str, topics: &[&str]) -> InMemoryReader {
        InMemoryReader {
            broker: self.clone(),
            group: group.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            positions: Mutex::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Partition a record with `key` is assigned to; keyless records go to 0
    pub fn partition_for(&self, key: Option<&[u8]>) -> i32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.shared.partitions as u64) as i32
            }
            None => 0,
        }
    }

    /// Every record on `topic`, partition by partition in offset order
    pub fn messages(&self, topic: &str) -> Vec<InboundMessage> {
        let state = self.shared.state.lock();
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn partition_messages(&self, topic: &str, partition: i32) -> Vec<InboundMessage> {
        let state = self.shared.state.lock();
        state
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Next offset `group` will read on `topic`/`partition`, if it committed any
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.shared.state.lock();
        state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Reject every subsequent write to `topic`
    pub fn fail_writes_to(&self, topic: &str) {
        self.shared
            .state
            .lock()
            .failing_topics
            .insert(topic.to_string());
    }

    /// Fail the next `count` fetches, whichever readers make them
    pub fn fail_fetches(&self, count: usize) {
        self.shared.state.lock().failing_fetches = count;
    }

    /// Injected fetch failures not yet consumed
    pub fn pending_fetch_failures(&self) -> usize {
        self.shared.state.lock().failing_fetches
    }

    pub fn fail_commits(&self, fail: bool) {
        self.shared.state.lock().fail_commits = fail;
    }

    fn append(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let partition = self.partition_for(message.key.as_deref());

        {
            let mut state = self.shared.state.lock();
            if state.failing_topics.contains(&message.topic) {
                return Err(BrokerError::Unavailable(format!(
                    "writes to {} are failing",
                    message.topic
                )));
            }

            let partitions = self.shared.partitions;
            let log = &mut state
                .topics
                .entry(message.topic.clone())
                .or_insert_with(|| vec![Vec::new(); partitions])[partition as usize];

            log.push(InboundMessage {
                topic: message.topic,
                partition,
                offset: log.len() as i64,
                key: message.key,
                payload: message.payload,
                headers: message.headers,
            });
        }

        self.shared.appended.notify_waiters();
        Ok(())
    }
}

pub struct InMemoryWriter {
    broker: InMemoryBroker,
}

#[async_trait]
impl MessageWriter for InMemoryWriter {
    async fn write(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        self.broker.append(message)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Single group member that owns every partition of its topics
pub struct InMemoryReader {
    broker: InMemoryBroker,
    group: String,
    topics: Vec<String>,
    /// (topic, partition) -> next offset to hand out
    positions: Mutex<HashMap<(String, i32), i64>>,
    /// Rotates the starting partition so no partition starves the others
    cursor: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryReader {
    pub fn group(&self) -> &str {
        &self.group
    }

    fn poll_next(&self) -> Result<Option<InboundMessage>, BrokerError> {
        let mut state = self.broker.shared.state.lock();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(BrokerError::Unavailable("fetches are failing".to_string()));
        }

        let mut positions = self.positions.lock();

        let partitions = self.broker.shared.partitions;
        let slots = self.topics.len() * partitions;
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        for step in 0..slots {
            let slot = (start + step) % slots;
            let topic = &self.topics[slot / partitions];
            let partition = (slot % partitions) as i32;

            let Some(log) = state
                .topics
                .get(topic)
                .and_then(|p| p.get(partition as usize))
            else {
                continue;
            };

            let position = positions
                .entry((topic.clone(), partition))
                .or_insert_with(|| {
                    state
                        .committed
                        .get(&(self.group.clone(), topic.clone(), partition))
                        .copied()
                        .unwrap_or(0)
                });

            if let Some(message) = log.get(*position as usize) {
                *position += 1;
                return Ok(Some(message.clone()));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl MessageReader for InMemoryReader {
    async fn fetch(&self) -> Result<InboundMessage, BrokerError> {
        loop {
            // Register interest before looking so an append in between is not missed
            let appended = self.broker.shared.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Closed);
            }

            if let Some(message) = self.poll_next()? {
                return Ok(message);
            }

            appended.await;
        }
    }

    async fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let mut state = self.broker.shared.state.lock();
        if state.fail_commits {
            return Err(BrokerError::Unavailable("commits are failing".to_string()));
        }

        let next = message.offset + 1;
        let committed = state
            .committed
            .entry((self.group.clone(), message.topic.clone(), message.partition))
            .or_insert(next);
        *committed = (*committed).max(next);

        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        self.broker.shared.appended.notify_waiters();
        Ok(())
    }
}
