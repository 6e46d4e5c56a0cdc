//! Administrative schedule API.
//!
//! Each call runs in one store transaction that covers the schedule records, the
//! trigger index and the affected jobs together. Transaction conflicts are retried under
//! the configured policy; `NotFound`, `AlreadyExists` and `Conflict` are returned as-is.

use std::sync::Arc;

use crate::core::{
    ApplicationId, ProgramId, ProgramSchedule, ProgramScheduleRecord, ProgramScheduleStatus, ScheduleId,
    SchedulerError,
};
use crate::infra::Store;
use crate::scheduler::job_queue::JobQueue;
use crate::scheduler::schedule_store::ScheduleStore;
use crate::util::{now_ms, RetryPolicy};

/// Schedule administration over the shared store.
#[derive(Clone)]
pub struct CoreScheduler {
    store: Store,
    schedules: ScheduleStore,
    queue: Arc<JobQueue>,
    retry: RetryPolicy,
}

impl CoreScheduler {
    /// Create the service.
    pub fn new(store: Store, queue: Arc<JobQueue>, retry: RetryPolicy) -> Self {
        Self {
            store,
            schedules: ScheduleStore,
            queue,
            retry,
        }
    }

    /// Add a schedule. New schedules start SUSPENDED.
    pub fn add_schedule(&self, schedule: &ProgramSchedule) -> Result<(), SchedulerError> {
        self.add_schedules(std::slice::from_ref(schedule))
    }

    /// Add several schedules. Either all are added or none is.
    pub fn add_schedules(&self, schedules: &[ProgramSchedule]) -> Result<(), SchedulerError> {
        for schedule in schedules {
            schedule.validate()?;
        }
        self.store.execute_with_retry(&self.retry, "add_schedules", |tx| {
            let now = now_ms();
            for schedule in schedules {
                self.schedules
                    .add(tx, schedule, ProgramScheduleStatus::Suspended, now)?;
            }
            Ok(())
        })?;
        for schedule in schedules {
            tracing::info!("added schedule {}", schedule.schedule_id());
        }
        Ok(())
    }

    /// Definition of a schedule.
    pub fn get_schedule(&self, id: &ScheduleId) -> Result<ProgramSchedule, SchedulerError> {
        self.store.read(|tx| self.schedules.get(tx, id))
    }

    /// Definition and status of a schedule.
    pub fn get_schedule_record(&self, id: &ScheduleId) -> Result<ProgramScheduleRecord, SchedulerError> {
        self.store.read(|tx| self.schedules.get_record(tx, id))
    }

    /// Status of a schedule.
    pub fn get_schedule_status(&self, id: &ScheduleId) -> Result<ProgramScheduleStatus, SchedulerError> {
        Ok(self.get_schedule_record(id)?.meta.status)
    }

    /// Schedules of an application, ordered by name.
    pub fn list_schedules_for_app(&self, app: &ApplicationId) -> Result<Vec<ProgramSchedule>, SchedulerError> {
        let records = self.store.read(|tx| self.schedules.list_for_app(tx, app))?;
        Ok(records.into_iter().map(|record| record.schedule).collect())
    }

    /// Schedules targeting a program, ordered by name.
    pub fn list_schedules_for_program(&self, program: &ProgramId) -> Result<Vec<ProgramSchedule>, SchedulerError> {
        let records = self.store.read(|tx| self.schedules.list_for_program(tx, program))?;
        Ok(records.into_iter().map(|record| record.schedule).collect())
    }

    /// Replace a schedule's definition, keeping its status and discarding its job.
    pub fn update_schedule(&self, schedule: &ProgramSchedule) -> Result<(), SchedulerError> {
        schedule.validate()?;
        let id = schedule.schedule_id();
        self.store.execute_with_retry(&self.retry, "update_schedule", |tx| {
            self.schedules.update(tx, schedule, now_ms())?;
            self.queue.remove_job(tx, &id)?;
            Ok(())
        })?;
        tracing::info!("updated schedule {}", id);
        Ok(())
    }

    /// Delete a schedule and its job.
    pub fn delete_schedule(&self, id: &ScheduleId) -> Result<(), SchedulerError> {
        self.delete_schedules(std::slice::from_ref(id))
    }

    /// Delete several schedules. Fails with `NotFound`, deleting nothing, if any is missing.
    pub fn delete_schedules(&self, ids: &[ScheduleId]) -> Result<(), SchedulerError> {
        self.store.execute_with_retry(&self.retry, "delete_schedules", |tx| {
            for id in ids {
                self.schedules.delete(tx, id)?;
                self.queue.remove_job(tx, id)?;
            }
            Ok(())
        })?;
        for id in ids {
            tracing::info!("deleted schedule {}", id);
        }
        Ok(())
    }

    /// Delete every schedule of an application. Returns the deleted ids.
    pub fn delete_schedules_for_app(&self, app: &ApplicationId) -> Result<Vec<ScheduleId>, SchedulerError> {
        let deleted = self.store.execute_with_retry(&self.retry, "delete_schedules_for_app", |tx| {
            let records = self.schedules.list_for_app(tx, app)?;
            let mut deleted = Vec::with_capacity(records.len());
            for record in records {
                let id = record.schedule.schedule_id();
                self.schedules.delete(tx, &id)?;
                self.queue.remove_job(tx, &id)?;
                deleted.push(id);
            }
            Ok(deleted)
        })?;
        tracing::info!("deleted {} schedules of {}", deleted.len(), app);
        Ok(deleted)
    }

    /// Enable a schedule. Fails with `Conflict` if it is already enabled.
    pub fn enable_schedule(&self, id: &ScheduleId) -> Result<(), SchedulerError> {
        self.set_status(id, ProgramScheduleStatus::Scheduled)
    }

    /// Disable a schedule and discard its job. Fails with `Conflict` if already disabled.
    pub fn disable_schedule(&self, id: &ScheduleId) -> Result<(), SchedulerError> {
        self.set_status(id, ProgramScheduleStatus::Suspended)
    }

    fn set_status(&self, id: &ScheduleId, status: ProgramScheduleStatus) -> Result<(), SchedulerError> {
        self.store.execute_with_retry(&self.retry, "set_schedule_status", |tx| {
            let record = self.schedules.get_record(tx, id)?;
            if record.meta.status == status {
                return Err(SchedulerError::Conflict(format!("schedule {id} is already {status:?}")));
            }
            self.schedules.set_status(tx, id, status, now_ms())?;
            if status == ProgramScheduleStatus::Suspended {
                self.queue.remove_job(tx, id)?;
            }
            Ok(())
        })?;
        tracing::info!("schedule {} is now {:?}", id, status);
        Ok(())
    }
}
