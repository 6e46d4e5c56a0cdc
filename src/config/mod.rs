//! Configuration models for the scheduler runtime.

pub mod scheduler;

pub use scheduler::{
    BusBackendConfig, ConstraintCheckConfig, LoggingConfig, OutboxConfig, RetryConfig, SchedulerConfig, StoreBackendConfig,
    SubscriberConfig, TimeEventConfig, TopicConfig,
};
