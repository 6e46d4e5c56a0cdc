//! Time event publisher.
//!
//! Computes the cron fire times of every enabled TIME schedule and publishes one TIME
//! notification per fire time onto the time topic. Passes cover `(last pass, now]`; ticks
//! missed while the publisher was not running are not replayed.
//!
//! Every published tick is recorded as the schedule's published mark, and a pass starts
//! each schedule after its mark. A pass that fails part way is retried over the same
//! window without republishing the ticks that already went out.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::TimeEventConfig;
use crate::core::{Notification, SchedulerError, Trigger};
use crate::infra::{MessagingService, Store};
use crate::scheduler::{ScheduleStore, TimeMark};
use crate::util::{datetime_from_ms, now_ms};

/// Publishes TIME notifications for enabled cron schedules.
pub struct TimeEventPublisher {
    store: Store,
    bus: Arc<dyn MessagingService>,
    schedules: ScheduleStore,
    topic: String,
    config: TimeEventConfig,
}

impl TimeEventPublisher {
    /// Publisher writing to `topic`.
    pub fn new(store: Store, bus: Arc<dyn MessagingService>, topic: impl Into<String>, config: TimeEventConfig) -> Self {
        Self {
            store,
            bus,
            schedules: ScheduleStore,
            topic: topic.into(),
            config,
        }
    }

    /// Publish fire times in `(from_ms, to_ms]`. Returns the number published.
    pub async fn publish_due(&self, from_ms: i64, to_ms: i64) -> Result<usize, SchedulerError> {
        let (Some(from), Some(to)) = (datetime_from_ms(from_ms), datetime_from_ms(to_ms)) else {
            return Err(SchedulerError::InvalidSchedule(format!(
                "time window {from_ms}..{to_ms} is out of range"
            )));
        };
        let records = self.store.read(|tx| self.schedules.list_all(tx))?;
        let mut published = 0;
        for record in records.iter().filter(|r| r.is_enabled()) {
            let Trigger::Time(trigger) = &record.schedule.trigger else {
                continue;
            };
            let id = record.schedule.schedule_id();
            let mark = self
                .store
                .read(|tx| self.schedules.time_mark(tx, &id, TimeMark::Published))?;
            let start = match mark.and_then(datetime_from_ms) {
                Some(marked) if marked > from => marked,
                _ => from,
            };
            let fire_times = match trigger.fire_times_between(start, to, self.config.max_fires_per_pass) {
                Ok(times) => times,
                Err(e) => {
                    tracing::warn!(schedule = %id, "cannot evaluate cron: {}", e);
                    continue;
                }
            };
            for fired in fire_times {
                let fired_ms = fired.timestamp_millis();
                self.bus
                    .publish_notification(&self.topic, &Notification::time(&id, fired_ms))
                    .await?;
                self.store
                    .execute(|tx| self.schedules.set_time_mark(tx, &id, TimeMark::Published, fired_ms))?;
                published += 1;
            }
        }
        if published > 0 {
            tracing::debug!(topic = %self.topic, "published {} time events", published);
        }
        Ok(published)
    }

    /// Publish on every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("time event publisher started on {}", self.topic);
        let mut last = now_ms();
        let interval = Duration::from_millis(self.config.interval_ms);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            let now = now_ms();
            match self.publish_due(last, now).await {
                Ok(_) => last = now,
                Err(e) => tracing::warn!("time event pass failed: {}", e),
            }
        }
        tracing::info!("time event publisher stopped");
    }
}
