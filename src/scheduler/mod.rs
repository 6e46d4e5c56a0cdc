//! Schedule store, job queue, launch handoff and the administrative API.

pub mod job_queue;
pub mod launcher;
pub mod schedule_store;
pub mod service;

pub use job_queue::{JobProgress, JobQueue, JobScan, JobScanCursor};
pub use launcher::{
    ChannelLauncher, LaunchRequest, ProgramLauncher, SCHEDULE_NAME_ARG, TRIGGERING_NOTIFICATIONS_ARG,
};
pub use schedule_store::{ScheduleStore, TimeMark};
pub use service::CoreScheduler;
