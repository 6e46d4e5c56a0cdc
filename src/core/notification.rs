//! Notification envelope exchanged over the bus.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{DatasetId, ProgramRunId, ProgramRunStatus, ScheduleId, SchedulerError};

/// Well-known property keys.
pub mod props {
    /// Schedule a TIME notification was fired for.
    pub const SCHEDULE_ID: &str = "scheduleId";
    /// Dataset a PARTITION notification refers to.
    pub const DATASET_ID: &str = "datasetId";
    /// JSON list of partition keys.
    pub const PARTITION_KEYS: &str = "partitionKeys";
    /// JSON-encoded program run identity.
    pub const PROGRAM_RUN_ID: &str = "programRunId";
    /// Run status name.
    pub const PROGRAM_STATUS: &str = "programStatus";
    /// Start or running timestamp in milliseconds.
    pub const LOGICAL_START_TIME: &str = "logicalStartTime";
    /// End timestamp in milliseconds.
    pub const END_TIME: &str = "endTime";
    /// JSON-encoded failure cause.
    pub const ERROR: &str = "error";
    /// JSON-encoded user arguments.
    pub const USER_OVERRIDES: &str = "userOverrides";
    /// JSON-encoded system arguments.
    pub const SYSTEM_OVERRIDES: &str = "systemOverrides";
    /// Run id assigned by the container runtime.
    pub const RUNTIME_RUN_ID: &str = "runtimeRunId";
    /// Fire time of a TIME notification.
    pub const FIRED_TIME: &str = "firedTime";
}

/// Notification class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// Cron tick for one schedule.
    Time,
    /// New dataset partition(s).
    Partition,
    /// Program run status change.
    ProgramStatus,
}

/// Partition key fields of a dataset partition.
pub type PartitionKey = BTreeMap<String, String>;

/// Typed envelope `{type, properties}`. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification class.
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// String properties; see [`props`].
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Notification {
    /// Empty notification of a type.
    pub fn new(notification_type: NotificationType) -> Self {
        Self {
            notification_type,
            properties: BTreeMap::new(),
        }
    }

    /// TIME notification for `schedule` fired at `fired_ms`.
    pub fn time(schedule: &ScheduleId, fired_ms: i64) -> Self {
        Self::new(NotificationType::Time)
            .with_property(props::SCHEDULE_ID, schedule.to_string())
            .with_property(props::FIRED_TIME, fired_ms.to_string())
    }

    /// PARTITION notification for new partitions of `dataset`.
    pub fn partition(dataset: &DatasetId, keys: &[PartitionKey]) -> Result<Self, SchedulerError> {
        Ok(Self::new(NotificationType::Partition)
            .with_property(props::DATASET_ID, dataset.to_string())
            .with_property(props::PARTITION_KEYS, serde_json::to_string(keys)?))
    }

    /// PROGRAM_STATUS notification for `run` entering `status`.
    pub fn program_status(run: &ProgramRunId, status: ProgramRunStatus) -> Result<Self, SchedulerError> {
        Ok(Self::new(NotificationType::ProgramStatus)
            .with_property(props::PROGRAM_RUN_ID, serde_json::to_string(run)?)
            .with_property(props::PROGRAM_STATUS, status.as_str()))
    }

    /// Add or replace a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Property value, if present.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn required(&self, key: &str) -> Result<&str, SchedulerError> {
        self.property(key).ok_or_else(|| {
            SchedulerError::MalformedNotification(format!(
                "{:?} notification missing `{key}`",
                self.notification_type
            ))
        })
    }

    /// Optional millisecond timestamp property.
    pub fn timestamp(&self, key: &str) -> Result<Option<i64>, SchedulerError> {
        self.property(key)
            .map(|raw| {
                raw.parse::<i64>().map_err(|_| {
                    SchedulerError::MalformedNotification(format!("`{key}` is not a timestamp: {raw}"))
                })
            })
            .transpose()
    }

    /// Schedule id of a TIME notification.
    pub fn schedule_id(&self) -> Result<ScheduleId, SchedulerError> {
        self.required(props::SCHEDULE_ID)?.parse()
    }

    /// Dataset id of a PARTITION notification.
    pub fn dataset_id(&self) -> Result<DatasetId, SchedulerError> {
        self.required(props::DATASET_ID)?.parse()
    }

    /// Run identity of a PROGRAM_STATUS notification.
    pub fn program_run_id(&self) -> Result<ProgramRunId, SchedulerError> {
        let raw = self.required(props::PROGRAM_RUN_ID)?;
        serde_json::from_str(raw)
            .map_err(|e| SchedulerError::MalformedNotification(format!("bad program run id: {e}")))
    }

    /// Run status of a PROGRAM_STATUS notification.
    pub fn program_run_status(&self) -> Result<ProgramRunStatus, SchedulerError> {
        self.required(props::PROGRAM_STATUS)?.parse()
    }

    /// JSON-encoded string map property, empty when absent.
    pub fn string_map(&self, key: &str) -> Result<BTreeMap<String, String>, SchedulerError> {
        self.property(key).map_or_else(
            || Ok(BTreeMap::new()),
            |raw| {
                serde_json::from_str(raw)
                    .map_err(|e| SchedulerError::MalformedNotification(format!("bad `{key}`: {e}")))
            },
        )
    }

    /// Wire form.
    pub fn to_json(&self) -> Result<String, SchedulerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the wire form. Failures are reported as malformed input.
    pub fn from_json(input: &str) -> Result<Self, SchedulerError> {
        serde_json::from_str(input)
            .map_err(|e| SchedulerError::MalformedNotification(format!("undecodable payload: {e}")))
    }
}
