//! Core scheduling model: identities, notifications, triggers, schedules and jobs.

pub mod constraint;
pub mod error;
pub mod ids;
pub mod job;
pub mod notification;
pub mod program;
pub mod schedule;
pub mod trigger;

pub use constraint::{Constraint, ConstraintContext, ConstraintResult};
pub use error::{AppResult, LaunchError, SchedulerError};
pub use ids::{ApplicationId, DatasetId, ProgramId, ProgramRunId, ProgramType, ScheduleId};
pub use job::{Job, JobState};
pub use notification::{props, Notification, NotificationType, PartitionKey};
pub use program::{BasicThrowable, ProgramRunStatus, ProgramStatus, RunRecord};
pub use schedule::{ProgramSchedule, ProgramScheduleMeta, ProgramScheduleRecord, ProgramScheduleStatus};
pub use trigger::{
    PartitionTrigger, ProgramStatusTrigger, TimeTrigger, Trigger, TriggerEvaluation, TIME_TRIGGER_KEY,
};
