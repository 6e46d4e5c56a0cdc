//! Program run statuses, failure causes and run records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{ProgramRunId, SchedulerError};

/// Status of a single program run, as persisted in its run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramRunStatus {
    /// Launch accepted, program not yet running.
    Starting,
    /// Program is running.
    Running,
    /// Program suspended by the user.
    Suspended,
    /// Suspended program is being resumed.
    Resuming,
    /// Finished normally.
    Completed,
    /// Stopped on request.
    Killed,
    /// Finished with an error.
    Failed,
}

impl ProgramRunStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Starting,
        Self::Running,
        Self::Suspended,
        Self::Resuming,
        Self::Completed,
        Self::Killed,
        Self::Failed,
    ];

    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Killed | Self::Failed)
    }

    /// Whether a record in `self` may move to `next`.
    ///
    /// KILLED and FAILED are reachable from every live status. A run only suspends
    /// while running or resuming, and only resumes from SUSPENDED.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ProgramRunStatus::*;
        matches!(
            (self, next),
            (Starting, Running | Completed | Killed | Failed)
                | (Running, Suspended | Completed | Killed | Failed)
                | (Suspended, Resuming | Killed | Failed)
                | (Resuming, Running | Suspended | Completed | Killed | Failed)
        )
    }

    /// Coarse status used by program-status triggers.
    pub const fn program_status(self) -> ProgramStatus {
        match self {
            Self::Starting => ProgramStatus::Initializing,
            Self::Running | Self::Suspended | Self::Resuming => ProgramStatus::Running,
            Self::Completed => ProgramStatus::Completed,
            Self::Killed => ProgramStatus::Killed,
            Self::Failed => ProgramStatus::Failed,
        }
    }

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Resuming => "RESUMING",
            Self::Completed => "COMPLETED",
            Self::Killed => "KILLED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProgramRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramRunStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SchedulerError::MalformedNotification(format!("unknown run status `{s}`")))
    }
}

/// Program status as seen by program-status triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramStatus {
    /// Starting up.
    Initializing,
    /// Running, suspended or resuming.
    Running,
    /// Finished normally.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped on request.
    Killed,
}

impl ProgramStatus {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        }
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable failure cause, built from an error and its `source()` chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicThrowable {
    /// Error type name.
    pub class_name: String,
    /// Error message.
    pub message: Option<String>,
    /// Frames, if the producer captured any.
    #[serde(default)]
    pub stack_trace: Vec<String>,
    /// Underlying cause.
    #[serde(default)]
    pub cause: Option<Box<BasicThrowable>>,
}

impl BasicThrowable {
    /// Cause with a class name and message.
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: Some(message.into()),
            stack_trace: Vec::new(),
            cause: None,
        }
    }

    /// Capture an error and its source chain.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut chain = Vec::new();
        let mut current = err.source();
        while let Some(source) = current {
            chain.push(source.to_string());
            current = source.source();
        }
        let cause = chain.into_iter().rev().fold(None, |cause, message| {
            Some(Box::new(Self {
                class_name: "Error".into(),
                message: Some(message),
                stack_trace: Vec::new(),
                cause,
            }))
        });
        Self {
            class_name: std::any::type_name::<E>().to_string(),
            message: Some(err.to_string()),
            stack_trace: Vec::new(),
            cause,
        }
    }

    /// Parse the JSON form carried in notifications.
    pub fn from_json(input: &str) -> Result<Self, SchedulerError> {
        serde_json::from_str(input)
            .map_err(|e| SchedulerError::MalformedNotification(format!("bad failure cause: {e}")))
    }
}

/// Durable record of one program run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identity.
    pub run_id: ProgramRunId,
    /// Current status.
    pub status: ProgramRunStatus,
    /// Start time in milliseconds.
    pub start_ms: Option<i64>,
    /// Time the run was first seen running.
    pub running_ms: Option<i64>,
    /// Time of the latest suspension.
    pub suspend_ms: Option<i64>,
    /// End time in milliseconds.
    pub stop_ms: Option<i64>,
    /// Run id assigned by the container runtime.
    pub runtime_run_id: Option<String>,
    /// User argument snapshot.
    #[serde(default)]
    pub user_args: BTreeMap<String, String>,
    /// System argument snapshot.
    #[serde(default)]
    pub system_args: BTreeMap<String, String>,
    /// Failure cause for FAILED runs.
    pub failure_cause: Option<BasicThrowable>,
}

impl RunRecord {
    /// Record in `status` with nothing else known yet.
    pub fn new(run_id: ProgramRunId, status: ProgramRunStatus) -> Self {
        Self {
            run_id,
            status,
            start_ms: None,
            running_ms: None,
            suspend_ms: None,
            stop_ms: None,
            runtime_run_id: None,
            user_args: BTreeMap::new(),
            system_args: BTreeMap::new(),
            failure_cause: None,
        }
    }
}
