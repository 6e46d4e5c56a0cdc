//! Program schedules and their enablement status.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::ids::validate_part;
use crate::core::{ApplicationId, Constraint, ProgramId, ScheduleId, SchedulerError, Trigger};

/// Schedule definition. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSchedule {
    /// Name, unique within the owning application.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Program to launch. Its application owns the schedule.
    pub program: ProgramId,
    /// Properties passed to the launched program as user arguments.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Trigger.
    pub trigger: Trigger,
    /// Constraints, evaluated in order.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl ProgramSchedule {
    /// Schedule without properties or constraints.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        program: ProgramId,
        trigger: Trigger,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            program,
            properties: BTreeMap::new(),
            trigger,
            constraints: Vec::new(),
        }
    }

    /// Set a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Append a constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Owning application.
    pub fn application_id(&self) -> ApplicationId {
        self.program.application_id()
    }

    /// Identity of this schedule.
    pub fn schedule_id(&self) -> ScheduleId {
        self.application_id().schedule(self.name.clone())
    }

    /// Validate identity, trigger and constraints.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_part("schedule name", &self.name)?;
        self.program.validate()?;
        self.trigger.validate()?;
        self.constraints.iter().try_for_each(Constraint::validate)
    }
}

/// Whether a schedule is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramScheduleStatus {
    /// Enabled: accumulates jobs and launches.
    Scheduled,
    /// Disabled: ignores notifications.
    Suspended,
}

/// Bookkeeping stored next to a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramScheduleMeta {
    /// Current status.
    pub status: ProgramScheduleStatus,
    /// Last definition or status change.
    pub last_updated_ms: i64,
}

/// A schedule together with its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramScheduleRecord {
    /// Definition.
    pub schedule: ProgramSchedule,
    /// Status and timestamps.
    pub meta: ProgramScheduleMeta,
}

impl ProgramScheduleRecord {
    /// Whether the schedule is enabled.
    pub fn is_enabled(&self) -> bool {
        self.meta.status == ProgramScheduleStatus::Scheduled
    }
}
