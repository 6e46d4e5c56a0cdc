//! Program run state: lifecycle state machine, state writers and run records.

pub mod controller;
pub mod run_store;
pub mod writer;

pub use controller::{ControllerEvent, ProgramState, ProgramStateListener, ProgramStateMachine, StateAction};
pub use run_store::{RunStore, RunUpdate};
pub use writer::{
    DirectStoreProgramStateWriter, MessagingProgramStateWriter, NoOpProgramStateWriter, ProgramStateWriter,
    RunArguments,
};
