//! Launch constraints evaluated after a trigger is satisfied.

use serde::{Deserialize, Serialize};

use crate::core::{Job, SchedulerError};

/// Context a constraint is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintContext<'a> {
    /// Job waiting to launch.
    pub job: &'a Job,
    /// Evaluation time in milliseconds.
    pub now_ms: i64,
    /// Non-terminal runs of the schedule's target program.
    pub active_runs: usize,
}

/// Result of a single constraint check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintResult {
    /// The job may proceed.
    Satisfied,
    /// The job must wait.
    NotSatisfied {
        /// Why the job is held back.
        reason: String,
    },
}

/// A predicate a satisfied job must also pass before launching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Constraint {
    /// Job must be at least `delay_ms` old.
    Delay {
        /// Minimum job age.
        delay_ms: u64,
    },
    /// Fewer than `max_concurrency` runs of the target program may be active.
    Concurrency {
        /// Maximum active runs.
        max_concurrency: u32,
    },
}

impl Constraint {
    /// Reject unusable constraints.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::Delay { .. } => Ok(()),
            Self::Concurrency { max_concurrency: 0 } => Err(SchedulerError::InvalidSchedule(
                "max_concurrency must be greater than 0".into(),
            )),
            Self::Concurrency { .. } => Ok(()),
        }
    }

    /// Evaluate this constraint.
    pub fn check(&self, ctx: &ConstraintContext<'_>) -> ConstraintResult {
        match self {
            Self::Delay { delay_ms } => {
                let age = ctx.now_ms.saturating_sub(ctx.job.created_at_ms);
                if age >= i64::try_from(*delay_ms).unwrap_or(i64::MAX) {
                    ConstraintResult::Satisfied
                } else {
                    ConstraintResult::NotSatisfied {
                        reason: format!("job is {age}ms old, delay is {delay_ms}ms"),
                    }
                }
            }
            Self::Concurrency { max_concurrency } => {
                if ctx.active_runs < *max_concurrency as usize {
                    ConstraintResult::Satisfied
                } else {
                    ConstraintResult::NotSatisfied {
                        reason: format!(
                            "{} active runs, limit is {max_concurrency}",
                            ctx.active_runs
                        ),
                    }
                }
            }
        }
    }
}
