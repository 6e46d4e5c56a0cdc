//! Trigger definitions, trigger keys and satisfaction evaluation.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{DatasetId, Notification, NotificationType, ProgramId, ProgramStatus, SchedulerError};

/// Trigger key shared by all time schedules.
pub const TIME_TRIGGER_KEY: &str = "time";

/// Fires once per cron tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTrigger {
    /// Cron expression, five or six fields.
    pub cron_expression: String,
}

/// Fires once `num_partitions` partition notifications of a dataset have accumulated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTrigger {
    /// Watched dataset.
    pub dataset: DatasetId,
    /// Number of notifications required per occurrence.
    pub num_partitions: u32,
}

/// Fires when a program reaches one of the accepted statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramStatusTrigger {
    /// Upstream program.
    pub program: ProgramId,
    /// Accepted statuses.
    pub statuses: BTreeSet<ProgramStatus>,
}

/// Trigger of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    /// Cron schedule.
    Time(TimeTrigger),
    /// Partition count threshold.
    Partition(PartitionTrigger),
    /// Upstream program status.
    ProgramStatus(ProgramStatusTrigger),
}

/// Outcome of evaluating a trigger against accumulated notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvaluation {
    /// Satisfied; `used` holds indices into the input, in arrival order.
    Satisfied {
        /// Indices of the notifications consumed by this occurrence.
        used: Vec<usize>,
    },
    /// Not satisfied yet.
    NotSatisfied,
}

impl TriggerEvaluation {
    /// Whether the trigger was satisfied.
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }
}

/// Bring a cron expression into the six-field form the `cron` crate expects.
pub fn normalize_cron(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let joined = fields.join(" ").replace('?', "*");
    if fields.len() == 5 {
        format!("0 {joined}")
    } else {
        joined
    }
}

impl TimeTrigger {
    /// Create a time trigger.
    pub fn new(cron_expression: impl Into<String>) -> Self {
        Self {
            cron_expression: cron_expression.into(),
        }
    }

    /// Parsed cron schedule.
    pub fn schedule(&self) -> Result<cron::Schedule, SchedulerError> {
        cron::Schedule::from_str(&normalize_cron(&self.cron_expression)).map_err(|e| {
            SchedulerError::InvalidSchedule(format!("bad cron `{}`: {e}", self.cron_expression))
        })
    }

    /// Fire times in `(from, to]`, at most `limit` of them.
    pub fn fire_times_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
        let schedule = self.schedule()?;
        Ok(schedule
            .after(&from)
            .take_while(|t| *t <= to)
            .take(limit)
            .collect())
    }
}

impl PartitionTrigger {
    /// Trigger key for notifications about `dataset`.
    pub fn key_for(dataset: &DatasetId) -> String {
        format!("partition:{dataset}")
    }
}

impl ProgramStatusTrigger {
    /// Trigger key for `program` reaching `status`.
    pub fn key_for(program: &ProgramId, status: ProgramStatus) -> String {
        format!("programStatus:{program}.{status}")
    }
}

impl Trigger {
    /// Time trigger.
    pub fn time(cron_expression: impl Into<String>) -> Self {
        Self::Time(TimeTrigger::new(cron_expression))
    }

    /// Partition trigger.
    pub const fn partition(dataset: DatasetId, num_partitions: u32) -> Self {
        Self::Partition(PartitionTrigger {
            dataset,
            num_partitions,
        })
    }

    /// Program status trigger.
    pub fn program_status(program: ProgramId, statuses: impl IntoIterator<Item = ProgramStatus>) -> Self {
        Self::ProgramStatus(ProgramStatusTrigger {
            program,
            statuses: statuses.into_iter().collect(),
        })
    }

    /// Keys under which schedules with this trigger are indexed.
    pub fn trigger_keys(&self) -> Vec<String> {
        match self {
            Self::Time(_) => vec![TIME_TRIGGER_KEY.to_string()],
            Self::Partition(p) => vec![PartitionTrigger::key_for(&p.dataset)],
            Self::ProgramStatus(p) => p
                .statuses
                .iter()
                .map(|status| ProgramStatusTrigger::key_for(&p.program, *status))
                .collect(),
        }
    }

    /// Reject definitions that can never fire.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::Time(t) => t.schedule().map(|_| ()),
            Self::Partition(p) => {
                p.dataset.validate()?;
                if p.num_partitions == 0 {
                    return Err(SchedulerError::InvalidSchedule(
                        "num_partitions must be greater than 0".into(),
                    ));
                }
                Ok(())
            }
            Self::ProgramStatus(p) => {
                p.program.validate()?;
                if p.statuses.is_empty() {
                    return Err(SchedulerError::InvalidSchedule(
                        "program status trigger needs at least one status".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Evaluate against notifications in arrival order.
    pub fn evaluate(&self, notifications: &[Notification]) -> TriggerEvaluation {
        let used: Vec<usize> = match self {
            Self::Time(_) => notifications
                .iter()
                .position(|n| n.notification_type == NotificationType::Time)
                .into_iter()
                .collect(),
            Self::Partition(p) => {
                let required = p.num_partitions as usize;
                let matching: Vec<usize> = notifications
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| {
                        n.notification_type == NotificationType::Partition
                            && n.dataset_id().is_ok_and(|d| d == p.dataset)
                    })
                    .map(|(i, _)| i)
                    .take(required)
                    .collect();
                if matching.len() < required {
                    return TriggerEvaluation::NotSatisfied;
                }
                matching
            }
            Self::ProgramStatus(p) => notifications
                .iter()
                .position(|n| {
                    n.notification_type == NotificationType::ProgramStatus
                        && n.program_run_id().is_ok_and(|run| run.program == p.program)
                        && n
                            .program_run_status()
                            .is_ok_and(|s| p.statuses.contains(&s.program_status()))
                })
                .into_iter()
                .collect(),
        };
        if used.is_empty() {
            TriggerEvaluation::NotSatisfied
        } else {
            TriggerEvaluation::Satisfied { used }
        }
    }
}
