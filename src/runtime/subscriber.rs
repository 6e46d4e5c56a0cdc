//! Notification subscriber loop.
//!
//! A [`SubscriberLoop`] owns one topic. Each iteration loads the committed offset,
//! fetches a batch after it and hands every notification to a [`NotificationHandler`]
//! inside a single store transaction that also records the new offset. A retryable
//! failure aborts the batch and leaves the offset untouched, so the same messages are
//! fetched again. Any other failure is confined to its message: the message's writes
//! are rolled back, it is logged and skipped, and the batch commits without it.
//! Launches staged by a batch are dispatched once it has committed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::SubscriberConfig;
use crate::core::{Notification, SchedulerError};
use crate::infra::{Message, MessageId, MessagingService, Store, Transaction};
use crate::scheduler::JobQueue;
use crate::util::now_ms;

/// Processes one notification inside the subscriber's transaction.
pub trait NotificationHandler: Send + Sync {
    /// Apply `notification`. Malformed input should be reported as
    /// [`SchedulerError::MalformedNotification`] before anything is written.
    fn handle(&self, tx: &mut Transaction, notification: &Notification, now_ms: i64) -> Result<(), SchedulerError>;
}

/// Outcome of one fetch-process-commit cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Messages fetched and committed past.
    pub fetched: usize,
    /// Messages skipped as malformed or unprocessable.
    pub skipped: usize,
}

/// Subscriber of one bus topic.
pub struct SubscriberLoop {
    consumer: String,
    topic: String,
    store: Store,
    bus: Arc<dyn MessagingService>,
    queue: Arc<JobQueue>,
    handler: Arc<dyn NotificationHandler>,
    config: SubscriberConfig,
    progress: watch::Sender<Option<MessageId>>,
    commit_signal: Option<Arc<Notify>>,
}

impl SubscriberLoop {
    /// Subscriber of `topic`, storing its offset under `consumer`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: impl Into<String>,
        topic: impl Into<String>,
        store: Store,
        bus: Arc<dyn MessagingService>,
        queue: Arc<JobQueue>,
        handler: Arc<dyn NotificationHandler>,
        config: SubscriberConfig,
    ) -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            consumer: consumer.into(),
            topic: topic.into(),
            store,
            bus,
            queue,
            handler,
            config,
            progress,
            commit_signal: None,
        }
    }

    /// Wake `signal` after every committed batch.
    #[must_use]
    pub fn with_commit_signal(mut self, signal: Arc<Notify>) -> Self {
        self.commit_signal = Some(signal);
        self
    }

    /// Topic this loop consumes.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receiver of the last committed offset.
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<MessageId>> {
        self.progress.subscribe()
    }

    /// Last committed offset of this subscriber.
    pub fn committed_offset(&self) -> Result<Option<MessageId>, SchedulerError> {
        self.store
            .read(|tx| self.queue.retrieve_subscriber_state(tx, &self.consumer, &self.topic))
    }

    /// Run one fetch-process-commit cycle.
    pub async fn process_batch(&self) -> Result<BatchOutcome, SchedulerError> {
        let offset = self.committed_offset()?;
        let messages = self
            .bus
            .fetch(&self.topic, offset.as_ref(), self.config.batch_size)
            .await?;
        let Some(last) = messages.last().map(|m| m.id) else {
            return Ok(BatchOutcome::default());
        };
        let skipped = self.store.execute(|tx| {
            let current = self
                .queue
                .retrieve_subscriber_state(tx, &self.consumer, &self.topic)?;
            if current != offset {
                return Err(SchedulerError::TransactionConflict(format!(
                    "offset of {}/{} moved during fetch",
                    self.consumer, self.topic
                )));
            }
            let skipped = self.apply_messages(tx, &messages)?;
            self.queue
                .persist_subscriber_state(tx, &self.consumer, &self.topic, &last)?;
            Ok(skipped)
        })?;
        self.dispatch_launches();
        self.progress.send_replace(Some(last));
        if let Some(signal) = &self.commit_signal {
            signal.notify_one();
        }
        tracing::debug!(
            topic = %self.topic,
            fetched = messages.len(),
            skipped,
            offset = %last,
            "committed batch"
        );
        Ok(BatchOutcome {
            fetched: messages.len(),
            skipped,
        })
    }

    fn apply_messages(&self, tx: &mut Transaction, messages: &[Message]) -> Result<usize, SchedulerError> {
        let now = now_ms();
        let mut skipped = 0;
        for message in messages {
            let savepoint = tx.savepoint();
            let result =
                Notification::from_json(&message.payload).and_then(|n| self.handler.handle(tx, &n, now));
            match result {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    tx.rollback_to(savepoint);
                    tracing::warn!(
                        topic = %self.topic,
                        id = %message.id,
                        malformed = e.is_malformed(),
                        "skipping notification: {}",
                        e
                    );
                    skipped += 1;
                }
            }
        }
        Ok(skipped)
    }

    fn dispatch_launches(&self) {
        match self.queue.dispatch_launches(&self.store) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(topic = %self.topic, "dispatched {} launches", n),
            Err(e) => tracing::warn!(topic = %self.topic, "launch dispatch failed: {}", e),
        }
    }

    /// Poll until `cancel` fires. Cancellation is observed between batches.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("subscriber {} started on topic {}", self.consumer, self.topic);
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let backoff = Duration::from_millis(self.config.error_backoff_ms);
        self.dispatch_launches();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let delay = match self.process_batch().await {
                Ok(outcome) if outcome.fetched > 0 => Duration::ZERO,
                Ok(_) => poll,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(topic = %self.topic, "batch aborted, retrying: {}", e);
                    backoff
                }
                Err(e) => {
                    tracing::error!(topic = %self.topic, "batch failed: {}", e);
                    backoff
                }
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("subscriber {} stopped on topic {}", self.consumer, self.topic);
    }
}
