//! Run records inside the store.

use std::collections::BTreeMap;

use crate::core::{BasicThrowable, ProgramId, ProgramRunId, ProgramRunStatus, RunRecord, SchedulerError};
use crate::infra::{Table, Transaction};

/// A status change to apply to a run record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunUpdate {
    /// Run accepted.
    Starting {
        /// Start time.
        start_ms: i64,
        /// Container runtime run id.
        runtime_run_id: Option<String>,
        /// User argument snapshot.
        user_args: BTreeMap<String, String>,
        /// System argument snapshot.
        system_args: BTreeMap<String, String>,
    },
    /// Run is executing.
    Running {
        /// Time the run came alive.
        running_ms: i64,
        /// Container runtime run id.
        runtime_run_id: Option<String>,
    },
    /// Run suspended.
    Suspended {
        /// Suspension time, if known.
        at_ms: Option<i64>,
    },
    /// Suspended run resuming.
    Resuming,
    /// Run reached a terminal status.
    Stopped {
        /// COMPLETED, KILLED or FAILED.
        status: ProgramRunStatus,
        /// End time.
        end_ms: i64,
        /// Failure cause.
        cause: Option<BasicThrowable>,
    },
}

impl RunUpdate {
    /// Status the record moves to.
    pub const fn status(&self) -> ProgramRunStatus {
        match self {
            Self::Starting { .. } => ProgramRunStatus::Starting,
            Self::Running { .. } => ProgramRunStatus::Running,
            Self::Suspended { .. } => ProgramRunStatus::Suspended,
            Self::Resuming => ProgramRunStatus::Resuming,
            Self::Stopped { status, .. } => *status,
        }
    }
}

/// Accessor for run records, keyed by `<program>/<run>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStore;

impl RunStore {
    fn key(run: &ProgramRunId) -> String {
        format!("{}/{}", run.program, run.run)
    }

    fn prefix(program: &ProgramId) -> String {
        format!("{program}/")
    }

    /// Record of a run.
    pub fn get(&self, tx: &mut Transaction, run: &ProgramRunId) -> Result<Option<RunRecord>, SchedulerError> {
        tx.get(Table::RunRecords, &Self::key(run))
    }

    /// All records of a program.
    pub fn list_for_program(&self, tx: &mut Transaction, program: &ProgramId) -> Result<Vec<RunRecord>, SchedulerError> {
        Ok(tx
            .scan_prefix::<RunRecord>(Table::RunRecords, &Self::prefix(program))?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Number of non-terminal runs of a program.
    pub fn count_active(&self, tx: &mut Transaction, program: &ProgramId) -> Result<usize, SchedulerError> {
        Ok(self
            .list_for_program(tx, program)?
            .iter()
            .filter(|record| !record.status.is_terminal())
            .count())
    }

    /// Apply `update` if the transition is allowed. Returns whether the record changed.
    ///
    /// Starting, running and stop updates create the record when it is missing. Duplicate
    /// and backward transitions are ignored.
    pub fn apply(&self, tx: &mut Transaction, run: &ProgramRunId, update: RunUpdate) -> Result<bool, SchedulerError> {
        let status = update.status();
        let mut record = match self.get(tx, run)? {
            Some(existing) if existing.status == status => {
                tracing::debug!("run {} already {}, ignoring duplicate", run, status);
                return Ok(false);
            }
            Some(existing) if !existing.status.can_transition_to(status) => {
                tracing::warn!("ignoring transition of run {} from {} to {}", run, existing.status, status);
                return Ok(false);
            }
            Some(existing) => existing,
            None if matches!(update, RunUpdate::Suspended { .. } | RunUpdate::Resuming) => {
                tracing::warn!("ignoring {} for unknown run {}", status, run);
                return Ok(false);
            }
            None => RunRecord::new(run.clone(), status),
        };

        record.status = status;
        match update {
            RunUpdate::Starting {
                start_ms,
                runtime_run_id,
                user_args,
                system_args,
            } => {
                record.start_ms = Some(start_ms);
                record.runtime_run_id = runtime_run_id.or(record.runtime_run_id);
                record.user_args = user_args;
                record.system_args = system_args;
            }
            RunUpdate::Running {
                running_ms,
                runtime_run_id,
            } => {
                record.running_ms.get_or_insert(running_ms);
                record.start_ms.get_or_insert(running_ms);
                record.runtime_run_id = runtime_run_id.or(record.runtime_run_id);
            }
            RunUpdate::Suspended { at_ms } => record.suspend_ms = at_ms,
            RunUpdate::Resuming => {}
            RunUpdate::Stopped { end_ms, cause, .. } => {
                record.stop_ms = Some(end_ms);
                record.failure_cause = cause;
            }
        }
        tx.put(Table::RunRecords, Self::key(run), &record)?;
        Ok(true)
    }
}
