//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
///
/// `NotFound`, `AlreadyExists` and `Conflict` are the failures the administrative API
/// surfaces to callers. Everything else is either retried at a persistence boundary or
/// logged by the notification pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Referenced schedule, job, run record or offset does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// An entity with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The entity is already in the requested state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Optimistic transaction lost against a concurrent commit.
    #[error("transaction conflict on {0}")]
    TransactionConflict(String),
    /// Schedule definition failed validation.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    /// Notification payload could not be interpreted.
    #[error("malformed notification: {0}")]
    MalformedNotification(String),
    /// State machine or run record transition not allowed.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// Durable storage failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// Notification bus failure.
    #[error("messaging error: {0}")]
    Messaging(String),
    /// Encoding or decoding failure outside of notification parsing.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SchedulerError {
    /// Whether retrying the same operation later can succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionConflict(_) | Self::Storage(_) | Self::Messaging(_)
        )
    }

    /// Whether the error describes an input that can never be processed.
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedNotification(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Failure reported by a [`ProgramLauncher`](crate::scheduler::ProgramLauncher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    /// The launch id was already handed off.
    #[error("duplicate launch {0}")]
    Duplicate(String),
    /// The launcher could not accept the request right now.
    #[error("launch rejected: {0}")]
    Rejected(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SchedulerError::TransactionConflict("job".into()).is_retryable());
        assert!(SchedulerError::Storage("disk".into()).is_retryable());
        assert!(!SchedulerError::NotFound("s".into()).is_retryable());
        assert!(!SchedulerError::MalformedNotification("x".into()).is_retryable());
        assert!(SchedulerError::MalformedNotification("x".into()).is_malformed());
    }
}
