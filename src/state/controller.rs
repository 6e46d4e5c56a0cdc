//! Program lifecycle state machine.
//!
//! [`ProgramStateMachine`] is pure: feeding it a [`ControllerEvent`] yields the
//! [`StateAction`]s to perform. [`ProgramStateListener`] runs those actions against a
//! [`ProgramStateWriter`].

use std::sync::Arc;

use crate::core::{BasicThrowable, ProgramRunId, ProgramRunStatus, SchedulerError};
use crate::state::writer::ProgramStateWriter;
use crate::util::now_ms;

/// Controller-side lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramState {
    /// Launched, not yet alive.
    Starting,
    /// Running.
    Alive,
    /// Suspended.
    Suspended,
    /// Resuming from suspension.
    Resuming,
    /// Stop requested, waiting for the run to end.
    Stopping,
    /// Finished normally.
    Completed,
    /// Stopped on request.
    Killed,
    /// Finished with an error.
    Error,
}

impl ProgramState {
    /// Whether the run has ended.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Killed | Self::Error)
    }
}

/// Lifecycle event reported by a program controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Program is running.
    Alive,
    /// Program suspended.
    Suspended,
    /// Program resuming.
    Resuming,
    /// Stop requested.
    Stopping,
    /// Program finished.
    Completed,
    /// Program was killed.
    Killed,
    /// Program failed.
    Error(BasicThrowable),
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateAction {
    /// Record the run as starting.
    Start {
        /// Start time.
        start_ms: i64,
    },
    /// Record the run as running.
    Running {
        /// Start time of the run.
        start_ms: i64,
    },
    /// Record a suspension.
    Suspend,
    /// Record a resumption.
    Resume,
    /// Record the end of the run.
    Stop {
        /// Terminal status.
        status: ProgramRunStatus,
        /// End time.
        end_ms: i64,
        /// Failure cause.
        cause: Option<BasicThrowable>,
    },
}

/// Lifecycle state machine of one run.
#[derive(Debug, Clone)]
pub struct ProgramStateMachine {
    run: ProgramRunId,
    state: ProgramState,
    start_ms: Option<i64>,
}

impl ProgramStateMachine {
    /// Machine in STARTING for `run`.
    pub const fn new(run: ProgramRunId) -> Self {
        Self {
            run,
            state: ProgramState::Starting,
            start_ms: None,
        }
    }

    /// Current state.
    pub const fn state(&self) -> ProgramState {
        self.state
    }

    /// Run this machine tracks.
    pub const fn run(&self) -> &ProgramRunId {
        &self.run
    }

    fn start_time(&mut self, now_ms: i64) -> i64 {
        *self
            .start_ms
            .get_or_insert_with(|| self.run.embedded_time_ms().unwrap_or(now_ms))
    }

    /// Actions announcing the initial STARTING state.
    pub fn begin(&mut self, now_ms: i64) -> Vec<StateAction> {
        vec![StateAction::Start {
            start_ms: self.start_time(now_ms),
        }]
    }

    /// Apply an event, returning the actions to perform.
    pub fn handle(&mut self, event: ControllerEvent, now_ms: i64) -> Result<Vec<StateAction>, SchedulerError> {
        use ControllerEvent as E;
        use ProgramState as S;

        let stop = |status, cause| StateAction::Stop {
            status,
            end_ms: now_ms,
            cause,
        };
        let (next, actions) = match (self.state, event) {
            (current, event) if current.is_terminal() => {
                return Err(SchedulerError::InvalidTransition(format!(
                    "run {} is {current:?}, cannot handle {event:?}",
                    self.run
                )));
            }
            (S::Starting | S::Resuming, E::Alive) => (
                S::Alive,
                vec![StateAction::Running {
                    start_ms: self.start_time(now_ms),
                }],
            ),
            (S::Alive | S::Resuming, E::Suspended) => (S::Suspended, vec![StateAction::Suspend]),
            (S::Suspended, E::Resuming) => (S::Resuming, vec![StateAction::Resume]),
            (S::Stopping, E::Stopping) => (S::Stopping, Vec::new()),
            (S::Stopping, E::Completed | E::Killed | E::Error(_)) => {
                (S::Killed, vec![stop(ProgramRunStatus::Killed, None)])
            }
            (_, E::Stopping) => (S::Stopping, Vec::new()),
            (_, E::Completed) => (S::Completed, vec![stop(ProgramRunStatus::Completed, None)]),
            (_, E::Killed) => (S::Killed, vec![stop(ProgramRunStatus::Killed, None)]),
            (_, E::Error(cause)) => (S::Error, vec![stop(ProgramRunStatus::Failed, Some(cause))]),
            (current, event) => {
                return Err(SchedulerError::InvalidTransition(format!(
                    "run {} is {current:?}, cannot handle {event:?}",
                    self.run
                )));
            }
        };
        tracing::debug!("run {} {:?} -> {:?}", self.run, self.state, next);
        self.state = next;
        Ok(actions)
    }
}

/// Applies state machine actions to a writer.
pub struct ProgramStateListener {
    machine: ProgramStateMachine,
    writer: Arc<dyn ProgramStateWriter>,
    runtime_run_id: Option<String>,
}

impl ProgramStateListener {
    /// Listener for `run` writing through `writer`.
    pub fn new(run: ProgramRunId, writer: Arc<dyn ProgramStateWriter>) -> Self {
        Self {
            machine: ProgramStateMachine::new(run),
            writer,
            runtime_run_id: None,
        }
    }

    /// Attach the container runtime's run id.
    #[must_use]
    pub fn with_runtime_run_id(mut self, runtime_run_id: impl Into<String>) -> Self {
        self.runtime_run_id = Some(runtime_run_id.into());
        self
    }

    /// Current state.
    pub const fn state(&self) -> ProgramState {
        self.machine.state()
    }

    /// Record the initial STARTING state.
    pub async fn starting(&mut self) -> Result<(), SchedulerError> {
        let actions = self.machine.begin(now_ms());
        self.perform(actions).await
    }

    /// Handle a controller event.
    pub async fn on_event(&mut self, event: ControllerEvent) -> Result<ProgramState, SchedulerError> {
        let actions = self.machine.handle(event, now_ms())?;
        self.perform(actions).await?;
        Ok(self.machine.state())
    }

    async fn perform(&self, actions: Vec<StateAction>) -> Result<(), SchedulerError> {
        let run = self.machine.run();
        let runtime_run_id = self.runtime_run_id.as_deref();
        for action in actions {
            let result = match &action {
                StateAction::Start { start_ms } => self.writer.start(run, runtime_run_id, *start_ms).await,
                StateAction::Running { start_ms } => self.writer.running(run, runtime_run_id, *start_ms).await,
                StateAction::Suspend => self.writer.suspend(run).await,
                StateAction::Resume => self.writer.resume(run).await,
                StateAction::Stop { status, end_ms, cause } => {
                    self.writer.stop(run, *end_ms, *status, cause.as_ref()).await
                }
            };
            if let Err(e) = result {
                tracing::error!("failed to record {:?} for run {}: {}", action, run, e);
                return Err(e);
            }
        }
        Ok(())
    }
}
