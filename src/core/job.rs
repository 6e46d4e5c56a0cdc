//! Per-schedule notification accumulators.

use serde::{Deserialize, Serialize};

use crate::core::{Notification, ProgramSchedule, ScheduleId};

/// Lifecycle of a job. Launched jobs are removed rather than marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accumulating notifications.
    PendingTrigger,
    /// Trigger satisfied, held back by a constraint.
    PendingConstraint,
    /// Cleared for launch, handoff not yet accepted.
    PendingLaunch,
}

/// Durable accumulator for one schedule. At most one exists per schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Schedule the job belongs to.
    pub schedule_id: ScheduleId,
    /// Definition snapshot taken when the job was created.
    pub schedule: ProgramSchedule,
    /// `last_updated_ms` of the schedule the snapshot was taken from.
    pub schedule_last_updated_ms: i64,
    /// Stable key derived from the schedule identity.
    pub job_key: String,
    /// Per-schedule generation, unique across the schedule's lifetime.
    pub sequence: u64,
    /// Notifications not yet consumed, in arrival order.
    pub notifications: Vec<Notification>,
    /// Notifications that satisfied the trigger.
    #[serde(default)]
    pub satisfied_by: Vec<Notification>,
    /// Current state.
    pub state: JobState,
    /// Creation time in milliseconds.
    pub created_at_ms: i64,
}

impl Job {
    /// Job key used for a schedule.
    pub fn key_for(schedule: &ScheduleId) -> String {
        schedule.to_string()
    }

    /// Idempotency key of this job's launch handoff.
    pub fn launch_id(&self) -> String {
        format!("{}#{}", self.job_key, self.sequence)
    }
}
