//! Background services: subscriber loops, status persistence, outbox relay and timers.

pub mod constraint_checker;
pub mod handlers;
pub mod outbox;
pub mod service;
pub mod status_persist;
pub mod subscriber;
pub mod time_events;
pub mod tokio_spawner;

pub use constraint_checker::ConstraintChecker;
pub use handlers::{PartitionEventHandler, ProgramStatusTriggerHandler, TimeEventHandler};
pub use outbox::{Outbox, OutboxEntry, OutboxRelay};
pub use service::SchedulerRuntime;
pub use status_persist::ProgramStatusPersistHandler;
pub use subscriber::{BatchOutcome, NotificationHandler, SubscriberLoop};
pub use time_events::TimeEventPublisher;
pub use tokio_spawner::TokioSpawner;
