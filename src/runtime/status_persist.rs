//! Program status persist service.
//!
//! Consumes the program-status topic written by state writers, applies each transition
//! to the run record, and forwards terminal statuses that some enabled schedule listens
//! for onto the scheduler's program-status-trigger topic through the outbox.

use crate::core::{
    props, BasicThrowable, Notification, NotificationType, ProgramRunStatus, ProgramStatusTrigger, SchedulerError,
};
use crate::infra::Transaction;
use crate::runtime::outbox::Outbox;
use crate::runtime::subscriber::NotificationHandler;
use crate::scheduler::ScheduleStore;
use crate::state::{RunStore, RunUpdate};

/// Applies PROGRAM_STATUS notifications to run records.
pub struct ProgramStatusPersistHandler {
    runs: RunStore,
    schedules: ScheduleStore,
    outbox: Outbox,
    trigger_topic: String,
}

impl ProgramStatusPersistHandler {
    /// Handler forwarding to `trigger_topic`.
    pub fn new(trigger_topic: impl Into<String>) -> Self {
        Self {
            runs: RunStore,
            schedules: ScheduleStore,
            outbox: Outbox,
            trigger_topic: trigger_topic.into(),
        }
    }

    /// Run-record change described by `notification`, or `None` when a required
    /// timestamp is missing.
    fn update_for(
        notification: &Notification,
        status: ProgramRunStatus,
        now_ms: i64,
    ) -> Result<Option<RunUpdate>, SchedulerError> {
        let runtime_run_id = notification.property(props::RUNTIME_RUN_ID).map(str::to_string);
        let update = match status {
            ProgramRunStatus::Starting => notification
                .timestamp(props::LOGICAL_START_TIME)?
                .map(|start_ms| -> Result<_, SchedulerError> {
                    Ok(RunUpdate::Starting {
                        start_ms,
                        runtime_run_id,
                        user_args: notification.string_map(props::USER_OVERRIDES)?,
                        system_args: notification.string_map(props::SYSTEM_OVERRIDES)?,
                    })
                })
                .transpose()?,
            ProgramRunStatus::Running => notification
                .timestamp(props::LOGICAL_START_TIME)?
                .map(|running_ms| RunUpdate::Running {
                    running_ms,
                    runtime_run_id,
                }),
            ProgramRunStatus::Suspended => Some(RunUpdate::Suspended { at_ms: Some(now_ms) }),
            ProgramRunStatus::Resuming => Some(RunUpdate::Resuming),
            ProgramRunStatus::Completed | ProgramRunStatus::Killed | ProgramRunStatus::Failed => {
                let cause = notification
                    .property(props::ERROR)
                    .map(BasicThrowable::from_json)
                    .transpose()?;
                notification
                    .timestamp(props::END_TIME)?
                    .map(|end_ms| RunUpdate::Stopped { status, end_ms, cause })
            }
        };
        Ok(update)
    }
}

impl NotificationHandler for ProgramStatusPersistHandler {
    fn handle(&self, tx: &mut Transaction, notification: &Notification, now_ms: i64) -> Result<(), SchedulerError> {
        if notification.notification_type != NotificationType::ProgramStatus {
            return Err(SchedulerError::MalformedNotification(format!(
                "expected program status, got {:?}",
                notification.notification_type
            )));
        }
        let run = notification.program_run_id()?;
        let status = notification.program_run_status()?;
        let Some(update) = Self::update_for(notification, status, now_ms)? else {
            tracing::warn!(run = %run, "{} notification without its timestamp, ignoring", status);
            return Ok(());
        };
        if !self.runs.apply(tx, &run, update)? || !status.is_terminal() {
            return Ok(());
        }
        let key = ProgramStatusTrigger::key_for(&run.program, status.program_status());
        if self.schedules.has_enabled_for_key(tx, &key)? {
            self.outbox.enqueue(tx, &self.trigger_topic, notification, now_ms)?;
            tracing::debug!(run = %run, "forwarding {} to {}", status, self.trigger_topic);
        }
        Ok(())
    }
}
