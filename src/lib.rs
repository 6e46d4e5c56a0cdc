//! # Prometheus Scheduler
//!
//! A notification-driven schedule, trigger and job-queue engine.
//!
//! Programs are started by schedules. Each schedule pairs a target program with a
//! trigger (a cron expression, a partition count on a dataset, or the status of an
//! upstream program) and a list of launch constraints. Notifications arrive on bus
//! topics, accumulate in one job per schedule, and once the trigger is satisfied and
//! every constraint passes the job is handed to a [`ProgramLauncher`](scheduler::ProgramLauncher).
//!
//! ## Flow
//!
//! - A program's lifecycle is reported through a [`ProgramStateWriter`](state::ProgramStateWriter).
//! - The status persist service applies those reports to run records and forwards
//!   terminal statuses that some enabled schedule listens for.
//! - Subscriber loops consume the scheduler topics. Each batch is processed in one
//!   store transaction together with the subscriber's offset.
//! - The job queue evaluates triggers and constraints and launches with a
//!   deterministic launch id, so a retried transaction never launches twice.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prometheus_scheduler::builders::SchedulerBuilder;
//! use prometheus_scheduler::config::SchedulerConfig;
//! use prometheus_scheduler::core::{ApplicationId, ProgramSchedule, ProgramType, Trigger};
//! use prometheus_scheduler::runtime::TokioSpawner;
//! use prometheus_scheduler::util::init_logging;
//!
//! let config = SchedulerConfig::from_env()?;
//! init_logging(&config.logging);
//! let mut scheduler = SchedulerBuilder::new(config).build()?;
//! let mut launches = scheduler.take_launch_receiver().expect("channel launcher");
//!
//! let app = ApplicationId::new("default", "etl");
//! let schedule = ProgramSchedule::new(
//!     "nightly",
//!     "rebuild the warehouse",
//!     app.program(ProgramType::Workflow, "rebuild"),
//!     Trigger::time("0 2 * * *"),
//! );
//! scheduler.core().add_schedule(&schedule)?;
//! scheduler.core().enable_schedule(&schedule.schedule_id())?;
//!
//! let runtime = scheduler.start(&TokioSpawner::current()?);
//! while let Some(request) = launches.recv().await {
//!     println!("launch {} of {}", request.launch_id, request.program);
//! }
//! runtime.shutdown().await;
//! ```
//!
//! See `tests/` for end-to-end scenarios.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Domain model: identities, schedules, triggers, constraints, jobs and errors.
pub mod core;
/// Configuration models for topics, backends, retries and timers.
pub mod config;
/// Builders to construct the scheduler from configuration.
pub mod builders;
/// Infrastructure adapters for the durable store and the notification bus.
pub mod infra;
/// Background services: subscriber loops, status persistence, outbox and timers.
pub mod runtime;
/// Schedule store, job queue, launch handoff and the administrative API.
pub mod scheduler;
/// Program run state: lifecycle state machine, writers and run records.
pub mod state;
/// Shared utilities.
pub mod util;
