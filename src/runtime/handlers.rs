//! Handlers routing scheduler-topic notifications into the job queue.

use std::sync::Arc;

use crate::core::{
    props, Notification, NotificationType, PartitionTrigger, ProgramScheduleRecord, ProgramStatusTrigger,
    SchedulerError,
};
use crate::infra::Transaction;
use crate::runtime::subscriber::NotificationHandler;
use crate::scheduler::{JobQueue, ScheduleStore, TimeMark};

fn expect_type(notification: &Notification, expected: NotificationType) -> Result<(), SchedulerError> {
    if notification.notification_type == expected {
        Ok(())
    } else {
        Err(SchedulerError::MalformedNotification(format!(
            "expected {expected:?} notification, got {:?}",
            notification.notification_type
        )))
    }
}

fn dispatch(
    queue: &JobQueue,
    tx: &mut Transaction,
    records: &[ProgramScheduleRecord],
    notification: &Notification,
    now_ms: i64,
) -> Result<(), SchedulerError> {
    for record in records {
        let progress = queue.add_notification(tx, record, notification, now_ms)?;
        if progress.launched > 0 {
            tracing::debug!(
                schedule = %record.schedule.schedule_id(),
                launched = progress.launched,
                "notification cleared a job for launch"
            );
        }
    }
    Ok(())
}

/// TIME notifications, addressed to a single schedule by id.
///
/// Each fire time is accepted once per schedule: a notification whose `firedTime` is not
/// after the schedule's accepted mark is a republished tick and is ignored.
pub struct TimeEventHandler {
    queue: Arc<JobQueue>,
    schedules: ScheduleStore,
}

impl TimeEventHandler {
    /// Handler feeding `queue`.
    pub const fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            schedules: ScheduleStore,
        }
    }
}

impl NotificationHandler for TimeEventHandler {
    fn handle(&self, tx: &mut Transaction, notification: &Notification, now_ms: i64) -> Result<(), SchedulerError> {
        expect_type(notification, NotificationType::Time)?;
        let id = notification.schedule_id()?;
        let fired = notification.timestamp(props::FIRED_TIME)?;
        let Some(record) = self.schedules.find(tx, &id)? else {
            tracing::debug!("time event for unknown schedule {}", id);
            return Ok(());
        };
        if let Some(fired) = fired {
            let accepted = self.schedules.time_mark(tx, &id, TimeMark::Accepted)?;
            if accepted.is_some_and(|mark| fired <= mark) {
                tracing::debug!(schedule = %id, fired, "ignoring repeated time event");
                return Ok(());
            }
            self.schedules.set_time_mark(tx, &id, TimeMark::Accepted, fired)?;
        }
        dispatch(&self.queue, tx, std::slice::from_ref(&record), notification, now_ms)
    }
}

/// PARTITION notifications, fanned out to every schedule indexed under the dataset.
pub struct PartitionEventHandler {
    queue: Arc<JobQueue>,
    schedules: ScheduleStore,
}

impl PartitionEventHandler {
    /// Handler feeding `queue`.
    pub const fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            schedules: ScheduleStore,
        }
    }
}

impl NotificationHandler for PartitionEventHandler {
    fn handle(&self, tx: &mut Transaction, notification: &Notification, now_ms: i64) -> Result<(), SchedulerError> {
        expect_type(notification, NotificationType::Partition)?;
        let dataset = notification.dataset_id()?;
        let records = self
            .schedules
            .find_by_trigger_key(tx, &PartitionTrigger::key_for(&dataset))?;
        tracing::debug!("partition of {} matches {} schedules", dataset, records.len());
        dispatch(&self.queue, tx, &records, notification, now_ms)
    }
}

/// PROGRAM_STATUS notifications forwarded by the status persist service.
pub struct ProgramStatusTriggerHandler {
    queue: Arc<JobQueue>,
    schedules: ScheduleStore,
}

impl ProgramStatusTriggerHandler {
    /// Handler feeding `queue`.
    pub const fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            schedules: ScheduleStore,
        }
    }
}

impl NotificationHandler for ProgramStatusTriggerHandler {
    fn handle(&self, tx: &mut Transaction, notification: &Notification, now_ms: i64) -> Result<(), SchedulerError> {
        expect_type(notification, NotificationType::ProgramStatus)?;
        let run = notification.program_run_id()?;
        let status = notification.program_run_status()?;
        let key = ProgramStatusTrigger::key_for(&run.program, status.program_status());
        let records = self.schedules.find_by_trigger_key(tx, &key)?;
        tracing::debug!("run {} reached {}, {} schedules listening", run, status, records.len());
        dispatch(&self.queue, tx, &records, notification, now_ms)
    }
}
