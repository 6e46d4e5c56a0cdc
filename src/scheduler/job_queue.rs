//! Durable per-schedule jobs and subscriber offsets.
//!
//! Every operation runs inside the caller's [`Transaction`]. A notification is merged
//! into the schedule's job, the trigger and constraints are evaluated, and a cleared job
//! is staged in the launches table of the same transaction. Nothing reaches the launcher
//! until that transaction commits: [`JobQueue::dispatch_launches`] hands committed
//! launches off afterwards and removes each one the launcher accepts. A transaction that
//! fails to commit leaves no launch behind.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{
    ConstraintContext, ConstraintResult, Job, JobState, LaunchError, Notification, ProgramSchedule,
    ProgramScheduleRecord, ScheduleId, SchedulerError, TriggerEvaluation,
};
use crate::infra::{MessageId, Store, Table, Transaction};
use crate::scheduler::launcher::{LaunchRequest, ProgramLauncher};
use crate::scheduler::schedule_store::ScheduleStore;
use crate::state::run_store::RunStore;

const SCAN_PAGE: usize = 64;

/// What happened to a schedule's job after an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobProgress {
    /// Launches staged for handoff once the transaction commits.
    pub launched: usize,
    /// State of the job left behind, `None` if no job remains.
    pub remaining: Option<JobState>,
}

/// Resume point of a full scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScanCursor {
    /// Key of the last job returned.
    pub last_key: Option<String>,
}

/// Lazy iterator over all jobs, fetched in pages.
pub struct JobScan<'a> {
    tx: &'a mut Transaction,
    cursor: JobScanCursor,
    buffer: VecDeque<(String, Job)>,
    exhausted: bool,
}

impl JobScan<'_> {
    /// Cursor after the last job returned so far.
    pub fn cursor(&self) -> JobScanCursor {
        self.cursor.clone()
    }
}

impl Iterator for JobScan<'_> {
    type Item = Result<Job, SchedulerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .tx
                .scan_after::<Job>(Table::Jobs, "", self.cursor.last_key.as_deref(), SCAN_PAGE)
            {
                Ok(page) => {
                    self.exhausted = page.len() < SCAN_PAGE;
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        let (key, job) = self.buffer.pop_front()?;
        self.cursor.last_key = Some(key);
        Some(Ok(job))
    }
}

/// Job queue over the store.
pub struct JobQueue {
    launcher: Arc<dyn ProgramLauncher>,
    schedules: ScheduleStore,
    runs: RunStore,
}

impl JobQueue {
    /// Queue handing launches to `launcher`.
    pub fn new(launcher: Arc<dyn ProgramLauncher>) -> Self {
        Self {
            launcher,
            schedules: ScheduleStore,
            runs: RunStore,
        }
    }

    /// Job of a schedule, if any.
    pub fn get_job(&self, tx: &mut Transaction, schedule: &ScheduleId) -> Result<Option<Job>, SchedulerError> {
        tx.get(Table::Jobs, &Job::key_for(schedule))
    }

    fn new_job(
        &self,
        tx: &mut Transaction,
        schedule: &ProgramSchedule,
        schedule_last_updated_ms: i64,
        now_ms: i64,
    ) -> Result<Job, SchedulerError> {
        let schedule_id = schedule.schedule_id();
        let job_key = Job::key_for(&schedule_id);
        let sequence = tx.next_sequence(&format!("job:{job_key}"))?;
        Ok(Job {
            schedule_id,
            schedule: schedule.clone(),
            schedule_last_updated_ms,
            job_key,
            sequence,
            notifications: Vec::new(),
            satisfied_by: Vec::new(),
            state: JobState::PendingTrigger,
            created_at_ms: now_ms,
        })
    }

    /// Merge a notification into the schedule's job and advance it as far as possible.
    pub fn add_notification(
        &self,
        tx: &mut Transaction,
        record: &ProgramScheduleRecord,
        notification: &Notification,
        now_ms: i64,
    ) -> Result<JobProgress, SchedulerError> {
        let schedule_id = record.schedule.schedule_id();
        if !record.is_enabled() {
            tracing::debug!("schedule {} is suspended, dropping notification", schedule_id);
            return Ok(JobProgress::default());
        }
        let mut job = match self.get_job(tx, &schedule_id)? {
            Some(job) if job.schedule == record.schedule => job,
            Some(stale) => {
                tracing::warn!("discarding job {} built from an outdated schedule", stale.launch_id());
                self.new_job(tx, &record.schedule, record.meta.last_updated_ms, now_ms)?
            }
            None => self.new_job(tx, &record.schedule, record.meta.last_updated_ms, now_ms)?,
        };
        job.notifications.push(notification.clone());
        self.advance(tx, job, now_ms)
    }

    fn advance(&self, tx: &mut Transaction, mut job: Job, now_ms: i64) -> Result<JobProgress, SchedulerError> {
        let mut launched = 0;
        loop {
            match job.state {
                JobState::PendingTrigger => match job.schedule.trigger.evaluate(&job.notifications) {
                    TriggerEvaluation::NotSatisfied => break,
                    TriggerEvaluation::Satisfied { used } => {
                        let used: HashSet<usize> = used.into_iter().collect();
                        let (satisfied, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut job.notifications)
                            .into_iter()
                            .enumerate()
                            .partition(|(i, _)| used.contains(i));
                        job.satisfied_by = satisfied.into_iter().map(|(_, n)| n).collect();
                        job.notifications = rest.into_iter().map(|(_, n)| n).collect();
                        job.state = JobState::PendingConstraint;
                        tracing::debug!("trigger satisfied for job {}", job.launch_id());
                    }
                },
                JobState::PendingConstraint => {
                    let active_runs = if job.schedule.constraints.is_empty() {
                        0
                    } else {
                        self.runs.count_active(tx, &job.schedule.program)?
                    };
                    let ctx = ConstraintContext {
                        job: &job,
                        now_ms,
                        active_runs,
                    };
                    let blocked = job.schedule.constraints.iter().find_map(|c| match c.check(&ctx) {
                        ConstraintResult::Satisfied => None,
                        ConstraintResult::NotSatisfied { reason } => Some(reason),
                    });
                    if let Some(reason) = blocked {
                        tracing::debug!("job {} waiting on constraint: {}", job.launch_id(), reason);
                        break;
                    }
                    job.state = JobState::PendingLaunch;
                }
                JobState::PendingLaunch => {
                    tracing::debug!("staging launch {} for schedule {}", job.launch_id(), job.schedule_id);
                    tx.put(Table::Launches, job.launch_id(), &job)?;
                    launched += 1;
                    if job.notifications.is_empty() {
                        tx.delete(Table::Jobs, job.job_key.clone());
                        return Ok(JobProgress {
                            launched,
                            remaining: None,
                        });
                    }
                    let rest = std::mem::take(&mut job.notifications);
                    job = self.new_job(tx, &job.schedule, job.schedule_last_updated_ms, now_ms)?;
                    job.notifications = rest;
                }
            }
        }
        let remaining = Some(job.state);
        tx.put(Table::Jobs, job.job_key.clone(), &job)?;
        Ok(JobProgress { launched, remaining })
    }

    /// Discard a schedule's job. Returns the discarded job.
    pub fn remove_job(&self, tx: &mut Transaction, schedule: &ScheduleId) -> Result<Option<Job>, SchedulerError> {
        let job = self.get_job(tx, schedule)?;
        if let Some(job) = &job {
            tracing::debug!("removing job {} with {} notifications", job.launch_id(), job.notifications.len());
            tx.delete(Table::Jobs, job.job_key.clone());
        }
        Ok(job)
    }

    /// Lazy scan over every job in key order.
    pub fn full_scan<'a>(&self, tx: &'a mut Transaction) -> JobScan<'a> {
        self.full_scan_from(tx, JobScanCursor::default())
    }

    /// Resume a scan after `cursor`.
    pub fn full_scan_from<'a>(&self, tx: &'a mut Transaction, cursor: JobScanCursor) -> JobScan<'a> {
        JobScan {
            tx,
            cursor,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Jobs currently in `state`. PENDING_LAUNCH jobs are the staged launches.
    pub fn jobs_in_state(&self, tx: &mut Transaction, state: JobState) -> Result<Vec<Job>, SchedulerError> {
        if state == JobState::PendingLaunch {
            let staged = tx.scan_prefix::<Job>(Table::Launches, "")?;
            return Ok(staged.into_iter().map(|(_, job)| job).collect());
        }
        let mut jobs = Vec::new();
        for job in self.full_scan(tx) {
            let job = job?;
            if job.state == state {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Hand committed launches to the launcher. Returns the number accepted.
    ///
    /// A launch is removed once the launcher accepts it or reports it as a duplicate.
    /// Rejected launches stay staged for the next pass. Concurrent dispatchers may hand
    /// off the same launch; the launcher's duplicate check absorbs the repeat.
    pub fn dispatch_launches(&self, store: &Store) -> Result<usize, SchedulerError> {
        let staged = store.read(|tx| tx.scan_prefix::<Job>(Table::Launches, ""))?;
        let mut accepted = 0;
        for (launch_id, job) in staged {
            match self.launcher.launch(LaunchRequest::for_job(&job)?) {
                Ok(()) => {
                    tracing::info!("launched {} for schedule {}", launch_id, job.schedule_id);
                    accepted += 1;
                }
                Err(LaunchError::Duplicate(id)) => {
                    tracing::info!("launch {} was already handed off", id);
                }
                Err(LaunchError::Rejected(reason)) => {
                    tracing::warn!("launch of {} deferred: {}", launch_id, reason);
                    continue;
                }
            }
            let removed = store.execute(|tx| {
                if tx.get::<Job>(Table::Launches, &launch_id)?.is_some() {
                    tx.delete(Table::Launches, launch_id.clone());
                }
                Ok(())
            });
            match removed {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    tracing::debug!("launch {} left staged: {}", launch_id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }

    /// Re-evaluate jobs held back by constraints. Returns the launches staged.
    pub fn recheck_pending(&self, tx: &mut Transaction, now_ms: i64) -> Result<usize, SchedulerError> {
        let mut pending = Vec::new();
        for job in self.full_scan(tx) {
            let job = job?;
            if job.state != JobState::PendingTrigger {
                pending.push(job);
            }
        }
        let mut launched = 0;
        for job in pending {
            match self.schedules.find(tx, &job.schedule_id)? {
                Some(record) if record.is_enabled() && record.schedule == job.schedule => {
                    launched += self.advance(tx, job, now_ms)?.launched;
                }
                _ => {
                    tracing::warn!("dropping job {} of a missing or suspended schedule", job.launch_id());
                    tx.delete(Table::Jobs, job.job_key);
                }
            }
        }
        Ok(launched)
    }

    fn offset_key(consumer: &str, topic: &str) -> String {
        format!("{consumer}/{topic}")
    }

    /// Store a subscriber's offset in the same transaction as its job mutations.
    pub fn persist_subscriber_state(
        &self,
        tx: &mut Transaction,
        consumer: &str,
        topic: &str,
        offset: &MessageId,
    ) -> Result<(), SchedulerError> {
        tx.put(Table::Offsets, Self::offset_key(consumer, topic), &offset.to_string())
    }

    /// Last committed offset of a subscriber.
    pub fn retrieve_subscriber_state(
        &self,
        tx: &mut Transaction,
        consumer: &str,
        topic: &str,
    ) -> Result<Option<MessageId>, SchedulerError> {
        tx.get::<String>(Table::Offsets, &Self::offset_key(consumer, topic))?
            .map(|raw| raw.parse())
            .transpose()
    }
}
