//! Program state writers: turn lifecycle transitions into run-record changes.
//!
//! [`MessagingProgramStateWriter`] publishes PROGRAM_STATUS notifications that the
//! status persist service applies later. [`DirectStoreProgramStateWriter`] applies the
//! same changes to the store itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{props, BasicThrowable, Notification, ProgramRunId, ProgramRunStatus, SchedulerError};
use crate::infra::{MessagingService, Store};
use crate::state::run_store::{RunStore, RunUpdate};
use crate::util::{now_ms, RetryPolicy};

/// Argument snapshots recorded with a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArguments {
    /// User arguments.
    pub user: BTreeMap<String, String>,
    /// System arguments.
    pub system: BTreeMap<String, String>,
}

/// Sink for program lifecycle transitions.
#[async_trait]
pub trait ProgramStateWriter: Send + Sync {
    /// Run accepted at `start_ms`.
    async fn start(&self, run: &ProgramRunId, runtime_run_id: Option<&str>, start_ms: i64) -> Result<(), SchedulerError>;

    /// Run came alive at `running_ms`.
    async fn running(&self, run: &ProgramRunId, runtime_run_id: Option<&str>, running_ms: i64) -> Result<(), SchedulerError>;

    /// Run ended with a terminal `status`. Only FAILED is expected to carry a cause.
    async fn stop(
        &self,
        run: &ProgramRunId,
        end_ms: i64,
        status: ProgramRunStatus,
        cause: Option<&BasicThrowable>,
    ) -> Result<(), SchedulerError>;

    /// Run suspended.
    async fn suspend(&self, run: &ProgramRunId) -> Result<(), SchedulerError>;

    /// Suspended run resuming.
    async fn resume(&self, run: &ProgramRunId) -> Result<(), SchedulerError>;
}

fn ensure_terminal(status: ProgramRunStatus) -> Result<(), SchedulerError> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(SchedulerError::InvalidTransition(format!("{status} is not a terminal status")))
    }
}

/// Writer publishing PROGRAM_STATUS notifications onto the bus.
pub struct MessagingProgramStateWriter {
    bus: Arc<dyn MessagingService>,
    topic: String,
    retry: RetryPolicy,
    arguments: RunArguments,
}

impl MessagingProgramStateWriter {
    /// Writer publishing to `topic`.
    pub fn new(bus: Arc<dyn MessagingService>, topic: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            bus,
            topic: topic.into(),
            retry,
            arguments: RunArguments::default(),
        }
    }

    /// Attach argument snapshots sent with STARTING.
    #[must_use]
    pub fn with_arguments(mut self, user: BTreeMap<String, String>, system: BTreeMap<String, String>) -> Self {
        self.arguments = RunArguments { user, system };
        self
    }

    async fn publish(&self, notification: Notification) -> Result<(), SchedulerError> {
        let status = notification.property(props::PROGRAM_STATUS).unwrap_or_default().to_string();
        self.retry
            .retry_async("publish_program_status", || {
                self.bus.publish_notification(&self.topic, &notification)
            })
            .await?;
        tracing::debug!("published {} to {}", status, self.topic);
        Ok(())
    }
}

#[async_trait]
impl ProgramStateWriter for MessagingProgramStateWriter {
    async fn start(&self, run: &ProgramRunId, runtime_run_id: Option<&str>, start_ms: i64) -> Result<(), SchedulerError> {
        let mut notification = Notification::program_status(run, ProgramRunStatus::Starting)?
            .with_property(props::LOGICAL_START_TIME, start_ms.to_string())
            .with_property(props::USER_OVERRIDES, serde_json::to_string(&self.arguments.user)?)
            .with_property(props::SYSTEM_OVERRIDES, serde_json::to_string(&self.arguments.system)?);
        if let Some(id) = runtime_run_id {
            notification = notification.with_property(props::RUNTIME_RUN_ID, id);
        }
        self.publish(notification).await
    }

    async fn running(&self, run: &ProgramRunId, runtime_run_id: Option<&str>, running_ms: i64) -> Result<(), SchedulerError> {
        let mut notification = Notification::program_status(run, ProgramRunStatus::Running)?
            .with_property(props::LOGICAL_START_TIME, running_ms.to_string());
        if let Some(id) = runtime_run_id {
            notification = notification.with_property(props::RUNTIME_RUN_ID, id);
        }
        self.publish(notification).await
    }

    async fn stop(
        &self,
        run: &ProgramRunId,
        end_ms: i64,
        status: ProgramRunStatus,
        cause: Option<&BasicThrowable>,
    ) -> Result<(), SchedulerError> {
        ensure_terminal(status)?;
        let mut notification =
            Notification::program_status(run, status)?.with_property(props::END_TIME, end_ms.to_string());
        if let Some(cause) = cause {
            notification = notification.with_property(props::ERROR, serde_json::to_string(cause)?);
        }
        self.publish(notification).await
    }

    async fn suspend(&self, run: &ProgramRunId) -> Result<(), SchedulerError> {
        self.publish(Notification::program_status(run, ProgramRunStatus::Suspended)?)
            .await
    }

    async fn resume(&self, run: &ProgramRunId) -> Result<(), SchedulerError> {
        self.publish(Notification::program_status(run, ProgramRunStatus::Resuming)?)
            .await
    }
}

/// Writer applying run-record changes to the store, retrying transient failures.
pub struct DirectStoreProgramStateWriter {
    store: Store,
    runs: RunStore,
    retry: RetryPolicy,
    arguments: RunArguments,
}

impl DirectStoreProgramStateWriter {
    /// Writer over `store`.
    pub fn new(store: Store, retry: RetryPolicy) -> Self {
        Self {
            store,
            runs: RunStore,
            retry,
            arguments: RunArguments::default(),
        }
    }

    /// Attach argument snapshots persisted with STARTING.
    #[must_use]
    pub fn with_arguments(mut self, user: BTreeMap<String, String>, system: BTreeMap<String, String>) -> Self {
        self.arguments = RunArguments { user, system };
        self
    }

    async fn apply(&self, operation: &str, run: &ProgramRunId, update: RunUpdate) -> Result<(), SchedulerError> {
        let changed = self
            .retry
            .retry_async(operation, || {
                let update = update.clone();
                async move { self.store.execute(|tx| self.runs.apply(tx, run, update)) }
            })
            .await?;
        if !changed {
            tracing::debug!("{} left run {} unchanged", operation, run);
        }
        Ok(())
    }
}

#[async_trait]
impl ProgramStateWriter for DirectStoreProgramStateWriter {
    async fn start(&self, run: &ProgramRunId, runtime_run_id: Option<&str>, start_ms: i64) -> Result<(), SchedulerError> {
        let update = RunUpdate::Starting {
            start_ms,
            runtime_run_id: runtime_run_id.map(str::to_string),
            user_args: self.arguments.user.clone(),
            system_args: self.arguments.system.clone(),
        };
        self.apply("record_starting", run, update).await
    }

    async fn running(&self, run: &ProgramRunId, runtime_run_id: Option<&str>, running_ms: i64) -> Result<(), SchedulerError> {
        let update = RunUpdate::Running {
            running_ms,
            runtime_run_id: runtime_run_id.map(str::to_string),
        };
        self.apply("record_running", run, update).await
    }

    async fn stop(
        &self,
        run: &ProgramRunId,
        end_ms: i64,
        status: ProgramRunStatus,
        cause: Option<&BasicThrowable>,
    ) -> Result<(), SchedulerError> {
        ensure_terminal(status)?;
        let update = RunUpdate::Stopped {
            status,
            end_ms,
            cause: cause.cloned(),
        };
        self.apply("record_stop", run, update).await
    }

    async fn suspend(&self, run: &ProgramRunId) -> Result<(), SchedulerError> {
        self.apply("record_suspend", run, RunUpdate::Suspended { at_ms: Some(now_ms()) })
            .await
    }

    async fn resume(&self, run: &ProgramRunId) -> Result<(), SchedulerError> {
        self.apply("record_resume", run, RunUpdate::Resuming).await
    }
}

/// Writer that discards every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgramStateWriter;

#[async_trait]
impl ProgramStateWriter for NoOpProgramStateWriter {
    async fn start(&self, _run: &ProgramRunId, _runtime_run_id: Option<&str>, _start_ms: i64) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn running(&self, _run: &ProgramRunId, _runtime_run_id: Option<&str>, _running_ms: i64) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn stop(
        &self,
        _run: &ProgramRunId,
        _end_ms: i64,
        _status: ProgramRunStatus,
        _cause: Option<&BasicThrowable>,
    ) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn suspend(&self, _run: &ProgramRunId) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn resume(&self, _run: &ProgramRunId) -> Result<(), SchedulerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ApplicationId, ProgramType};
    use crate::infra::InMemoryMessagingService;
    use std::time::Duration;

    fn run() -> ProgramRunId {
        ApplicationId::new("ns", "app")
            .program(ProgramType::Spark, "etl")
            .run("r1")
    }

    #[tokio::test]
    async fn messaging_writer_publishes_status_notifications() {
        let bus = Arc::new(InMemoryMessagingService::new());
        let writer = MessagingProgramStateWriter::new(bus.clone(), "programstatusevent", RetryPolicy::none())
            .with_arguments(BTreeMap::from([("a".to_string(), "1".to_string())]), BTreeMap::new());
        let run = run();
        writer.start(&run, Some("twill-9"), 100).await.unwrap();
        let cause = BasicThrowable::new("RuntimeException", "boom");
        writer
            .stop(&run, 200, ProgramRunStatus::Failed, Some(&cause))
            .await
            .unwrap();

        let messages = bus.fetch("programstatusevent", None, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        let start = Notification::from_json(&messages[0].payload).unwrap();
        assert_eq!(start.program_run_status().unwrap(), ProgramRunStatus::Starting);
        assert_eq!(start.property(props::RUNTIME_RUN_ID), Some("twill-9"));
        assert_eq!(start.string_map(props::USER_OVERRIDES).unwrap().get("a").map(String::as_str), Some("1"));
        let stop = Notification::from_json(&messages[1].payload).unwrap();
        assert_eq!(stop.timestamp(props::END_TIME).unwrap(), Some(200));
        let decoded = BasicThrowable::from_json(stop.property(props::ERROR).unwrap()).unwrap();
        assert_eq!(decoded, cause);
    }

    #[tokio::test]
    async fn stop_requires_terminal_status() {
        let writer = DirectStoreProgramStateWriter::new(Store::in_memory(), RetryPolicy::none());
        let err = writer
            .stop(&run(), 1, ProgramRunStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn direct_writer_persists_runs() {
        let store = Store::in_memory();
        let writer = DirectStoreProgramStateWriter::new(store.clone(), RetryPolicy::fixed(3, Duration::from_millis(1)));
        let run = run();
        writer.start(&run, None, 1).await.unwrap();
        writer.running(&run, None, 2).await.unwrap();
        writer.suspend(&run).await.unwrap();
        writer.resume(&run).await.unwrap();
        let record = store.read(|tx| RunStore.get(tx, &run)).unwrap().unwrap();
        assert_eq!(record.status, ProgramRunStatus::Resuming);
        assert!(record.suspend_ms.is_some());
    }
}
