//! Schedule records and the trigger-key index.
//!
//! Records live in [`Table::Schedules`] under `ns:app:name`, so the schedules of an
//! application form one key prefix. Every trigger key of a schedule has an entry
//! `<trigger key>|<schedule id>` in [`Table::TriggerIndex`]. TIME schedules also keep
//! their last published and last accepted fire times in [`Table::TimeMarks`].

use crate::core::{
    ApplicationId, ProgramId, ProgramSchedule, ProgramScheduleMeta, ProgramScheduleRecord,
    ProgramScheduleStatus, ScheduleId, SchedulerError,
};
use crate::infra::{Table, Transaction};

/// Progress marks kept per TIME schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeMark {
    /// Last fire time put on the time topic.
    Published,
    /// Last fire time merged into the schedule's job.
    Accepted,
}

impl TimeMark {
    fn key(self, schedule: &ScheduleId) -> String {
        match self {
            Self::Published => format!("published/{schedule}"),
            Self::Accepted => format!("accepted/{schedule}"),
        }
    }
}

/// Accessor for schedules inside a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleStore;

fn index_key(trigger_key: &str, schedule: &ScheduleId) -> String {
    format!("{trigger_key}|{schedule}")
}

fn index_prefix(trigger_key: &str) -> String {
    format!("{trigger_key}|")
}

fn app_prefix(app: &ApplicationId) -> String {
    format!("{app}:")
}

fn sorted(mut records: Vec<ProgramScheduleRecord>) -> Vec<ProgramScheduleRecord> {
    records.sort_by(|a, b| a.schedule.name.cmp(&b.schedule.name));
    records
}

impl ScheduleStore {
    /// Record of a schedule, if it exists.
    pub fn find(&self, tx: &mut Transaction, id: &ScheduleId) -> Result<Option<ProgramScheduleRecord>, SchedulerError> {
        tx.get(Table::Schedules, &id.to_string())
    }

    /// Record of a schedule.
    pub fn get_record(&self, tx: &mut Transaction, id: &ScheduleId) -> Result<ProgramScheduleRecord, SchedulerError> {
        self.find(tx, id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("schedule {id}")))
    }

    /// Definition of a schedule.
    pub fn get(&self, tx: &mut Transaction, id: &ScheduleId) -> Result<ProgramSchedule, SchedulerError> {
        Ok(self.get_record(tx, id)?.schedule)
    }

    /// Insert a new schedule.
    pub fn add(
        &self,
        tx: &mut Transaction,
        schedule: &ProgramSchedule,
        status: ProgramScheduleStatus,
        now_ms: i64,
    ) -> Result<(), SchedulerError> {
        let id = schedule.schedule_id();
        if tx.contains(Table::Schedules, &id.to_string())? {
            return Err(SchedulerError::AlreadyExists(format!("schedule {id}")));
        }
        self.write(tx, schedule.clone(), ProgramScheduleMeta { status, last_updated_ms: now_ms })
    }

    fn write(&self, tx: &mut Transaction, schedule: ProgramSchedule, meta: ProgramScheduleMeta) -> Result<(), SchedulerError> {
        let id = schedule.schedule_id();
        for key in schedule.trigger.trigger_keys() {
            tx.put(Table::TriggerIndex, index_key(&key, &id), &id)?;
        }
        tx.put(Table::Schedules, id.to_string(), &ProgramScheduleRecord { schedule, meta })
    }

    fn unindex(&self, tx: &mut Transaction, schedule: &ProgramSchedule) {
        let id = schedule.schedule_id();
        for key in schedule.trigger.trigger_keys() {
            tx.delete(Table::TriggerIndex, index_key(&key, &id));
        }
    }

    /// Replace a schedule's definition, keeping its status. Returns the previous record.
    pub fn update(&self, tx: &mut Transaction, schedule: &ProgramSchedule, now_ms: i64) -> Result<ProgramScheduleRecord, SchedulerError> {
        let previous = self.get_record(tx, &schedule.schedule_id())?;
        self.unindex(tx, &previous.schedule);
        self.write(
            tx,
            schedule.clone(),
            ProgramScheduleMeta {
                status: previous.meta.status,
                last_updated_ms: now_ms,
            },
        )?;
        Ok(previous)
    }

    /// Remove a schedule and its index entries. Returns the removed record.
    pub fn delete(&self, tx: &mut Transaction, id: &ScheduleId) -> Result<ProgramScheduleRecord, SchedulerError> {
        let record = self.get_record(tx, id)?;
        self.unindex(tx, &record.schedule);
        tx.delete(Table::Schedules, id.to_string());
        for mark in [TimeMark::Published, TimeMark::Accepted] {
            tx.delete(Table::TimeMarks, mark.key(id));
        }
        Ok(record)
    }

    /// Last fire time recorded under `mark`.
    pub fn time_mark(&self, tx: &mut Transaction, id: &ScheduleId, mark: TimeMark) -> Result<Option<i64>, SchedulerError> {
        tx.get(Table::TimeMarks, &mark.key(id))
    }

    /// Record `fired_ms` under `mark`.
    pub fn set_time_mark(
        &self,
        tx: &mut Transaction,
        id: &ScheduleId,
        mark: TimeMark,
        fired_ms: i64,
    ) -> Result<(), SchedulerError> {
        tx.put(Table::TimeMarks, mark.key(id), &fired_ms)
    }

    /// Change a schedule's status.
    pub fn set_status(
        &self,
        tx: &mut Transaction,
        id: &ScheduleId,
        status: ProgramScheduleStatus,
        now_ms: i64,
    ) -> Result<(), SchedulerError> {
        let mut record = self.get_record(tx, id)?;
        record.meta = ProgramScheduleMeta {
            status,
            last_updated_ms: now_ms,
        };
        tx.put(Table::Schedules, id.to_string(), &record)
    }

    /// Schedules of an application, ordered by name.
    pub fn list_for_app(&self, tx: &mut Transaction, app: &ApplicationId) -> Result<Vec<ProgramScheduleRecord>, SchedulerError> {
        let records = tx
            .scan_prefix::<ProgramScheduleRecord>(Table::Schedules, &app_prefix(app))?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        Ok(sorted(records))
    }

    /// Schedules targeting a program, ordered by name.
    pub fn list_for_program(&self, tx: &mut Transaction, program: &ProgramId) -> Result<Vec<ProgramScheduleRecord>, SchedulerError> {
        Ok(self
            .list_for_app(tx, &program.application_id())?
            .into_iter()
            .filter(|record| record.schedule.program == *program)
            .collect())
    }

    /// Every schedule.
    pub fn list_all(&self, tx: &mut Transaction) -> Result<Vec<ProgramScheduleRecord>, SchedulerError> {
        Ok(tx
            .scan_prefix::<ProgramScheduleRecord>(Table::Schedules, "")?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Schedules indexed under a trigger key, enabled or not.
    pub fn find_by_trigger_key(&self, tx: &mut Transaction, trigger_key: &str) -> Result<Vec<ProgramScheduleRecord>, SchedulerError> {
        let ids = tx.scan_prefix::<ScheduleId>(Table::TriggerIndex, &index_prefix(trigger_key))?;
        let mut records = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            match self.find(tx, &id)? {
                Some(record) => records.push(record),
                None => tracing::warn!("trigger index points at missing schedule {}", id),
            }
        }
        Ok(records)
    }

    /// Whether any enabled schedule is indexed under a trigger key.
    pub fn has_enabled_for_key(&self, tx: &mut Transaction, trigger_key: &str) -> Result<bool, SchedulerError> {
        Ok(self
            .find_by_trigger_key(tx, trigger_key)?
            .iter()
            .any(ProgramScheduleRecord::is_enabled))
    }
}
