//! End-to-end pipeline tests over the in-memory broker
//!
//! These tests verify:
//! 1. Retry ceiling and dead-lettering of exhausted messages
//! 2. Undecodable payloads skip the handler
//! 3. Offsets are committed even when the dead-letter write fails
//! 4. Per-aggregate ordering survives retries
//! 5. Redelivered events are deduplicated
//! 6. Shutdown during backoff leaves the message uncommitted
//! 7. Backoff only separates attempts, with the default schedule
//! 8. Fetch errors pause the loop without ending it

use event_pipeline::consumer::FETCH_ERROR_BACKOFF;
use event_pipeline::{
    handler_fn, headers, DeadLetterPublisher, Event, EventConsumer, EventHandler, EventProducer,
    IdempotentHandler, InMemoryBroker, MessageWriter, MessagingMetrics, OutboundMessage,
    RetryPolicy,
};
use event_schema::TopicNames;
use idempotent_consumer::InMemoryIdempotencyStore;
use parking_lot::Mutex;
use prometheus::Registry;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "ecommerce.order.created";
const DLQ_TOPIC: &str = "ecommerce.dlq.ecommerce.order.created";
const GROUP: &str = "inventory-service";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        jitter: 0.25,
    }
}

fn order_event(order_id: &str) -> Event {
    Event::new(
        "order.created",
        order_id,
        "order",
        "order-service",
        &serde_json::json!({"order_id": order_id}),
    )
    .unwrap()
}

struct Harness {
    broker: InMemoryBroker,
    metrics: Arc<MessagingMetrics>,
    producer: EventProducer,
}

impl Harness {
    fn new() -> Self {
        let broker = InMemoryBroker::new();
        let metrics = Arc::new(MessagingMetrics::new(&Registry::new()).unwrap());
        let producer = EventProducer::new(Arc::new(broker.writer()), vec![], metrics.clone());
        Self {
            broker,
            metrics,
            producer,
        }
    }

    fn consumer(&self, handler: Arc<dyn EventHandler>) -> Arc<EventConsumer> {
        self.consumer_with_policy(handler, fast_retry())
    }

    fn consumer_with_policy(
        &self,
        handler: Arc<dyn EventHandler>,
        policy: RetryPolicy,
    ) -> Arc<EventConsumer> {
        let dead_letter = DeadLetterPublisher::new(
            Arc::new(self.broker.writer()),
            TopicNames::default(),
            self.metrics.clone(),
        );
        Arc::new(
            EventConsumer::new(
                Arc::new(self.broker.reader(GROUP, &[TOPIC])),
                handler,
                GROUP,
                self.metrics.clone(),
            )
            .with_dead_letter(dead_letter)
            .with_retry_policy(policy),
        )
    }

    fn committed(&self, aggregate_id: &str) -> Option<i64> {
        let partition = self.broker.partition_for(Some(aggregate_id.as_bytes()));
        self.broker.committed_offset(GROUP, TOPIC, partition)
    }

    fn counter(&self, counter: &prometheus::IntCounterVec) -> u64 {
        counter.with_label_values(&[TOPIC, GROUP]).get()
    }
}

fn spawn(consumer: &Arc<EventConsumer>, shutdown: &CancellationToken) -> JoinHandle<()> {
    let consumer = consumer.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        consumer.start(shutdown).await.unwrap();
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn stop(shutdown: CancellationToken, task: JoinHandle<()>) {
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("consumer did not stop")
        .unwrap();
}

/// Handler failing the first `failures` calls, recording every call
fn flaky_handler(failures: usize, calls: Arc<AtomicUsize>) -> impl EventHandler {
    handler_fn(move |_event: Event| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if call < failures {
                anyhow::bail!("inventory service timeout (call {})", call + 1);
            }
            Ok(())
        }
    })
}

fn recording_handler<F, Fut>(record: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(handler_fn(record))
}

#[tokio::test]
async fn test_success_commits_without_dead_letter() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = harness.consumer(Arc::new(flaky_handler(0, calls.clone())));

    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(1)).await;
    stop(shutdown, task).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(harness.broker.messages(DLQ_TOPIC).is_empty());
    assert_eq!(harness.counter(&harness.metrics.messages_received), 1);
    assert_eq!(harness.counter(&harness.metrics.messages_processed), 1);
    assert_eq!(harness.counter(&harness.metrics.messages_failed), 0);
}

#[tokio::test]
async fn test_handler_invoked_three_times_then_dead_lettered() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = harness.consumer(Arc::new(flaky_handler(usize::MAX, calls.clone())));

    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(1)).await;
    stop(shutdown, task).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let dead = harness.broker.messages(DLQ_TOPIC);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].header(headers::DLQ_ORIGINAL_TOPIC), Some(TOPIC));
    assert_eq!(dead[0].header(headers::DLQ_CONSUMER_GROUP), Some(GROUP));
    assert_eq!(dead[0].header(headers::DLQ_ORIGINAL_OFFSET), Some("0"));
    assert!(dead[0]
        .header(headers::DLQ_ERROR)
        .unwrap()
        .contains("call 3"));

    assert_eq!(harness.counter(&harness.metrics.messages_failed), 1);
    assert_eq!(harness.counter(&harness.metrics.dlq_published), 1);
    assert_eq!(harness.counter(&harness.metrics.messages_processed), 0);
}

#[tokio::test]
async fn test_second_attempt_success_is_not_dead_lettered() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = harness.consumer(Arc::new(flaky_handler(1, calls.clone())));

    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(1)).await;
    stop(shutdown, task).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(harness.broker.messages(DLQ_TOPIC).is_empty());
    assert_eq!(harness.counter(&harness.metrics.messages_processed), 1);
}

#[tokio::test]
async fn test_undecodable_payload_skips_handler() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = harness.consumer(Arc::new(flaky_handler(0, calls.clone())));

    harness
        .broker
        .writer()
        .write(OutboundMessage::new(TOPIC, b"{\"event_type\":".to_vec()).with_key("order-1"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(1)).await;
    stop(shutdown, task).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let dead = harness.broker.messages(DLQ_TOPIC);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, b"{\"event_type\":".to_vec());
    assert!(dead[0]
        .header(headers::DLQ_ERROR)
        .unwrap()
        .starts_with("Decode error"));
    assert_eq!(harness.counter(&harness.metrics.messages_failed), 1);
}

#[tokio::test]
async fn test_dead_letter_failure_still_commits() {
    let harness = Harness::new();
    harness.broker.fail_writes_to(DLQ_TOPIC);
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = harness.consumer(Arc::new(flaky_handler(usize::MAX, calls.clone())));

    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(1)).await;
    stop(shutdown, task).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(harness.broker.messages(DLQ_TOPIC).is_empty());
    assert_eq!(harness.counter(&harness.metrics.dlq_published), 0);
}

#[tokio::test]
async fn test_same_aggregate_order_preserved_under_retry() {
    let harness = Harness::new();
    let handled = Arc::new(Mutex::new(Vec::new()));
    let failed_once = Arc::new(AtomicUsize::new(0));

    let handler = {
        let handled = handled.clone();
        let failed_once = failed_once.clone();
        recording_handler(move |event: Event| {
            let handled = handled.clone();
            let failed_once = failed_once.clone();
            async move {
                let step = event.data["step"].as_str().unwrap_or_default().to_string();
                // First delivery of "first" fails once
                if step == "first" && failed_once.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("transient failure");
                }
                handled.lock().push(step);
                Ok(())
            }
        })
    };
    let consumer = harness.consumer(handler);

    for step in ["first", "second"] {
        let event = Event::new(
            "order.updated",
            "order-7",
            "order",
            "order-service",
            &serde_json::json!({"step": step}),
        )
        .unwrap();
        harness.producer.publish(TOPIC, &event).await.unwrap();
    }

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-7") == Some(2)).await;
    stop(shutdown, task).await;

    assert_eq!(*handled.lock(), vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test]
async fn test_redelivered_event_is_deduplicated() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = IdempotentHandler::new(
        flaky_handler(0, calls.clone()),
        InMemoryIdempotencyStore::new(Duration::from_secs(3600)),
    )
    .with_metrics(harness.metrics.clone(), TOPIC, GROUP);
    let consumer = harness.consumer(Arc::new(handler));

    // Upstream retry publishes the same event twice
    let event = order_event("order-1");
    harness.producer.publish(TOPIC, &event).await.unwrap();
    harness.producer.publish(TOPIC, &event).await.unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(2)).await;
    stop(shutdown, task).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.counter(&harness.metrics.messages_duplicate), 1);
    assert_eq!(harness.counter(&harness.metrics.messages_processed), 2);
}

#[tokio::test]
async fn test_shutdown_during_backoff_leaves_message_uncommitted() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let dead_letter = DeadLetterPublisher::new(
        Arc::new(harness.broker.writer()),
        TopicNames::default(),
        harness.metrics.clone(),
    );
    let consumer = Arc::new(
        EventConsumer::new(
            Arc::new(harness.broker.reader(GROUP, &[TOPIC])),
            Arc::new(flaky_handler(usize::MAX, calls.clone())),
            GROUP,
            harness.metrics.clone(),
        )
        .with_dead_letter(dead_letter)
        .with_retry_policy(RetryPolicy {
            base_delay: Duration::from_secs(30),
            ..RetryPolicy::default()
        }),
    );

    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
    stop(shutdown, task).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.committed("order-1"), None);
    assert!(harness.broker.messages(DLQ_TOPIC).is_empty());

    // A new group member picks the message up again
    let replacement = harness.consumer(Arc::new(flaky_handler(0, Arc::new(AtomicUsize::new(0)))));
    let shutdown = CancellationToken::new();
    let task = spawn(&replacement, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(1)).await;
    stop(shutdown, task).await;
}

#[tokio::test]
async fn test_close_ends_loop_and_is_idempotent() {
    let harness = Harness::new();
    let consumer = harness.consumer(Arc::new(flaky_handler(0, Arc::new(AtomicUsize::new(0)))));

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);

    consumer.close().await.unwrap();
    consumer.close().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("closing the reader should stop the loop")
        .unwrap();
}

#[tokio::test]
async fn test_commit_failure_is_not_fatal() {
    let harness = Harness::new();
    harness.broker.fail_commits(true);
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = harness.consumer(Arc::new(flaky_handler(0, calls.clone())));

    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();
    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| calls.load(Ordering::SeqCst) == 2).await;
    stop(shutdown, task).await;

    assert_eq!(harness.committed("order-1"), None);
    assert_eq!(harness.counter(&harness.metrics.messages_processed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_default_backoff_only_between_attempts() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = harness.consumer_with_policy(
        Arc::new(flaky_handler(usize::MAX, calls.clone())),
        RetryPolicy::default(),
    );

    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();

    let started = Instant::now();
    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(1)).await;
    let elapsed = started.elapsed();
    stop(shutdown, task).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(harness.broker.messages(DLQ_TOPIC).len(), 1);

    // ~500ms then ~1s (±25%), and no sleep after the third attempt
    assert!(
        elapsed >= Duration::from_millis(1100) && elapsed <= Duration::from_millis(1900),
        "dead-lettered after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_fetch_error_pauses_then_recovers() {
    let harness = Harness::new();
    harness.broker.fail_fetches(1);
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = harness.consumer(Arc::new(flaky_handler(0, calls.clone())));

    harness
        .producer
        .publish(TOPIC, &order_event("order-1"))
        .await
        .unwrap();

    let started = Instant::now();
    let shutdown = CancellationToken::new();
    let task = spawn(&consumer, &shutdown);
    wait_until(|| harness.committed("order-1") == Some(1)).await;
    let elapsed = started.elapsed();
    stop(shutdown, task).await;

    assert_eq!(harness.broker.pending_fetch_failures(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(
        elapsed >= FETCH_ERROR_BACKOFF && elapsed < FETCH_ERROR_BACKOFF + Duration::from_millis(100),
        "processed after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_fetch_error_backoff() {
    let harness = Harness::new();
    harness.broker.fail_fetches(1);
    let consumer = harness.consumer(Arc::new(flaky_handler(0, Arc::new(AtomicUsize::new(0)))));

    let shutdown = CancellationToken::new();
    let task = {
        let consumer = consumer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.start(shutdown).await })
    };
    wait_until(|| harness.broker.pending_fetch_failures() == 0).await;

    let cancelled_at = Instant::now();
    shutdown.cancel();
    let result = task.await.unwrap();

    assert!(result.is_ok());
    assert!(cancelled_at.elapsed() < FETCH_ERROR_BACKOFF);
}
