//! Transactional outbox.
//!
//! Notifications that must be published as a consequence of a store commit are first
//! written to [`Table::Outbox`] inside that commit. [`OutboxRelay`] publishes them
//! afterwards and deletes each entry once the bus has accepted it, so an entry is
//! published at least once even if the process stops in between.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::core::{Notification, SchedulerError};
use crate::infra::{MessagingService, Store, Table, Transaction};

/// Pending publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Destination topic.
    pub topic: String,
    /// Wire form of the notification.
    pub payload: String,
    /// Time the entry was written.
    pub enqueued_ms: i64,
}

/// Access to the outbox table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Outbox;

impl Outbox {
    /// Stage `notification` for `topic`. Returns the entry key.
    pub fn enqueue(
        &self,
        tx: &mut Transaction,
        topic: &str,
        notification: &Notification,
        now_ms: i64,
    ) -> Result<String, SchedulerError> {
        let key = Uuid::now_v7().to_string();
        let entry = OutboxEntry {
            topic: topic.to_string(),
            payload: notification.to_json()?,
            enqueued_ms: now_ms,
        };
        tx.put(Table::Outbox, key.clone(), &entry)?;
        Ok(key)
    }

    /// Oldest pending entries.
    pub fn pending(&self, tx: &mut Transaction, limit: usize) -> Result<Vec<(String, OutboxEntry)>, SchedulerError> {
        tx.scan_after(Table::Outbox, "", None, limit)
    }
}

/// Publishes outbox entries after they commit.
pub struct OutboxRelay {
    store: Store,
    bus: Arc<dyn MessagingService>,
    outbox: Outbox,
    config: OutboxConfig,
    signal: Arc<Notify>,
}

impl OutboxRelay {
    /// Relay woken by `signal` and polling every `config.interval_ms`.
    pub fn new(store: Store, bus: Arc<dyn MessagingService>, config: OutboxConfig, signal: Arc<Notify>) -> Self {
        Self {
            store,
            bus,
            outbox: Outbox,
            config,
            signal,
        }
    }

    /// Publish one batch of pending entries in order. Stops at the first publish failure.
    pub async fn relay_once(&self) -> Result<usize, SchedulerError> {
        let pending = self
            .store
            .read(|tx| self.outbox.pending(tx, self.config.batch_size))?;
        let mut relayed = 0;
        for (key, entry) in pending {
            self.bus.publish(&entry.topic, entry.payload).await?;
            self.store.execute(|tx| {
                tx.delete(Table::Outbox, key.clone());
                Ok(())
            })?;
            tracing::debug!(topic = %entry.topic, "relayed outbox entry {}", key);
            relayed += 1;
        }
        Ok(relayed)
    }

    /// Relay until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("outbox relay started");
        let interval = Duration::from_millis(self.config.interval_ms);
        loop {
            match self.relay_once().await {
                Ok(n) if n >= self.config.batch_size => continue,
                Ok(_) => {}
                Err(e) => tracing::warn!("outbox relay pass failed: {}", e),
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.signal.notified() => {}
                () = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("outbox relay stopped");
    }
}
