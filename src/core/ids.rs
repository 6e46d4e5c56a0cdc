//! Entity identities and their canonical string forms.
//!
//! Identifier parts are restricted to `[A-Za-z0-9_-]+`, which keeps the separators used
//! by the string forms (`:` for schedules, `.` for datasets and programs) unambiguous.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::SchedulerError;

/// Check a single identifier part.
pub fn validate_part(kind: &str, value: &str) -> Result<(), SchedulerError> {
    if value.is_empty() {
        return Err(SchedulerError::InvalidSchedule(format!("{kind} must not be empty")));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SchedulerError::InvalidSchedule(format!(
            "{kind} `{value}` contains invalid characters"
        )));
    }
    Ok(())
}

fn split_exact<'a>(input: &'a str, sep: char, n: usize, kind: &str) -> Result<Vec<&'a str>, SchedulerError> {
    let parts: Vec<&str> = input.split(sep).collect();
    if parts.len() != n {
        return Err(SchedulerError::MalformedNotification(format!(
            "`{input}` is not a valid {kind}"
        )));
    }
    for part in &parts {
        validate_part(kind, part)
            .map_err(|e| SchedulerError::MalformedNotification(e.to_string()))?;
    }
    Ok(parts)
}

/// Application owning schedules and programs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId {
    /// Namespace.
    pub namespace: String,
    /// Application name.
    pub application: String,
}

impl ApplicationId {
    /// Create an application id.
    pub fn new(namespace: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            application: application.into(),
        }
    }

    /// Program of this application.
    pub fn program(&self, program_type: ProgramType, program: impl Into<String>) -> ProgramId {
        ProgramId {
            namespace: self.namespace.clone(),
            application: self.application.clone(),
            program_type,
            program: program.into(),
        }
    }

    /// Schedule of this application.
    pub fn schedule(&self, schedule: impl Into<String>) -> ScheduleId {
        ScheduleId {
            namespace: self.namespace.clone(),
            application: self.application.clone(),
            schedule: schedule.into(),
        }
    }

    /// Validate identifier parts.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_part("namespace", &self.namespace)?;
        validate_part("application", &self.application)
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.application)
    }
}

/// Kind of program a schedule can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    /// Workflow.
    Workflow,
    /// MapReduce job.
    Mapreduce,
    /// Spark job.
    Spark,
    /// Long-running service.
    Service,
    /// Worker.
    Worker,
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Workflow => "workflow",
            Self::Mapreduce => "mapreduce",
            Self::Spark => "spark",
            Self::Service => "service",
            Self::Worker => "worker",
        };
        f.write_str(name)
    }
}

impl FromStr for ProgramType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "workflow" => Ok(Self::Workflow),
            "mapreduce" => Ok(Self::Mapreduce),
            "spark" => Ok(Self::Spark),
            "service" => Ok(Self::Service),
            "worker" => Ok(Self::Worker),
            other => Err(SchedulerError::MalformedNotification(format!(
                "unknown program type `{other}`"
            ))),
        }
    }
}

/// Program identity. Formats as `ns.app.type.program`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramId {
    /// Namespace.
    pub namespace: String,
    /// Owning application.
    pub application: String,
    /// Program type.
    pub program_type: ProgramType,
    /// Program name.
    pub program: String,
}

impl ProgramId {
    /// Owning application.
    pub fn application_id(&self) -> ApplicationId {
        ApplicationId::new(self.namespace.clone(), self.application.clone())
    }

    /// Run of this program.
    pub fn run(&self, run: impl Into<String>) -> ProgramRunId {
        ProgramRunId {
            program: self.clone(),
            run: run.into(),
        }
    }

    /// Validate identifier parts.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.application_id().validate()?;
        validate_part("program", &self.program)
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.namespace, self.application, self.program_type, self.program
        )
    }
}

impl FromStr for ProgramId {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = split_exact(s, '.', 4, "program id")?;
        Ok(Self {
            namespace: parts[0].to_string(),
            application: parts[1].to_string(),
            program_type: parts[2].parse()?,
            program: parts[3].to_string(),
        })
    }
}

/// Schedule identity. Formats as `ns:app:name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleId {
    /// Namespace.
    pub namespace: String,
    /// Owning application.
    pub application: String,
    /// Schedule name.
    pub schedule: String,
}

impl ScheduleId {
    /// Owning application.
    pub fn application_id(&self) -> ApplicationId {
        ApplicationId::new(self.namespace.clone(), self.application.clone())
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.application, self.schedule)
    }
}

impl FromStr for ScheduleId {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = split_exact(s, ':', 3, "schedule id")?;
        Ok(Self {
            namespace: parts[0].to_string(),
            application: parts[1].to_string(),
            schedule: parts[2].to_string(),
        })
    }
}

/// Dataset identity. Formats as `ns.dataset`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId {
    /// Namespace.
    pub namespace: String,
    /// Dataset name.
    pub dataset: String,
}

impl DatasetId {
    /// Create a dataset id.
    pub fn new(namespace: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            dataset: dataset.into(),
        }
    }

    /// Validate identifier parts.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_part("namespace", &self.namespace)?;
        validate_part("dataset", &self.dataset)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.dataset)
    }
}

impl FromStr for DatasetId {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = split_exact(s, '.', 2, "dataset id")?;
        Ok(Self::new(parts[0], parts[1]))
    }
}

/// One execution attempt of a program.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramRunId {
    /// Program being run.
    pub program: ProgramId,
    /// Run id, usually a time-based UUID.
    pub run: String,
}

impl ProgramRunId {
    /// New run of `program` with a fresh time-based run id.
    pub fn generate(program: &ProgramId) -> Self {
        program.run(Uuid::now_v7().to_string())
    }

    /// Start time embedded in the run id, for UUID versions that carry one.
    pub fn embedded_time_ms(&self) -> Option<i64> {
        let uuid = Uuid::parse_str(&self.run).ok()?;
        let (secs, nanos) = uuid.get_timestamp()?.to_unix();
        let ms = secs.checked_mul(1000)?.checked_add(u64::from(nanos / 1_000_000))?;
        i64::try_from(ms).ok()
    }
}

impl fmt::Display for ProgramRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.program, self.run)
    }
}
