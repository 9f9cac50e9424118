//! Event handlers and the deduplicating decorator

use async_trait::async_trait;
use event_schema::Event;
use idempotent_consumer::IdempotencyStore;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::MessagingMetrics;

/// Business logic invoked once per delivered event
///
/// Returning an error makes the consumer retry the same event, so
/// implementations must tolerate being called more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (**self).handle(event).await
    }
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as an [`EventHandler`]
///
/// The closure receives an owned copy of the event.
///
/// ```
/// use event_pipeline::handler_fn;
///
/// let handler = handler_fn(|event| async move {
///     tracing::info!(event_id = %event.event_id, "order received");
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        f,
        _future: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

struct DuplicateLabels {
    metrics: Arc<MessagingMetrics>,
    topic: String,
    consumer_group: String,
}

/// Skips events whose ID the store has already seen
///
/// - Events without an ID always reach the inner handler.
/// - A store lookup failure fails open: the event is processed.
/// - The ID is recorded only after the inner handler succeeds; a failed
///   record is logged and the event still counts as handled.
///
/// The check and the record are not atomic, so two deliveries of one event
/// racing through the same decorator can both run the inner handler.
pub struct IdempotentHandler<H, S> {
    inner: H,
    store: S,
    duplicates: Option<DuplicateLabels>,
}

impl<H, S> IdempotentHandler<H, S>
where
    H: EventHandler,
    S: IdempotencyStore,
{
    pub fn new(inner: H, store: S) -> Self {
        Self {
            inner,
            store,
            duplicates: None,
        }
    }

    /// Count skipped duplicates under `topic`/`consumer_group`
    ///
    /// Without this, `messages_duplicate_total` stays at zero.
    pub fn with_metrics(
        mut self,
        metrics: Arc<MessagingMetrics>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        self.duplicates = Some(DuplicateLabels {
            metrics,
            topic: topic.into(),
            consumer_group: consumer_group.into(),
        });
        self
    }
}

#[async_trait]
impl<H, S> EventHandler for IdempotentHandler<H, S>
where
    H: EventHandler,
    S: IdempotencyStore,
{
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if !event.has_id() {
            return self.inner.handle(event).await;
        }

        match self.store.contains(&event.event_id).await {
            Ok(true) => {
                debug!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Event already processed, skipping"
                );
                if let Some(labels) = &self.duplicates {
                    labels
                        .metrics
                        .record_duplicate(&labels.topic, &labels.consumer_group);
                }
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    event_id = %event.event_id,
                    error = %e,
                    "Idempotency check failed, processing anyway"
                );
            }
        }

        self.inner.handle(event).await?;

        if let Err(e) = self.store.add(&event.event_id).await {
            warn!(
                event_id = %event.event_id,
                error = %e,
                "Failed to record processed event"
            );
        }

        Ok(())
    }
}
