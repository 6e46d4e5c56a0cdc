//! Tests for builder modules

use prometheus_scheduler::builders::SchedulerBuilder;
use prometheus_scheduler::config::{BusBackendConfig, SchedulerConfig, StoreBackendConfig};
use prometheus_scheduler::core::{ApplicationId, ProgramSchedule, ProgramScheduleStatus, ProgramType, Trigger};

fn schedule() -> ProgramSchedule {
    ProgramSchedule::new(
        "nightly",
        "",
        ApplicationId::new("ns", "app").program(ProgramType::Workflow, "wf"),
        Trigger::time("0 2 * * *"),
    )
}

#[test]
fn test_builder_defaults_to_channel_launcher() {
    let mut scheduler = SchedulerBuilder::new(SchedulerConfig::default()).build().unwrap();
    assert!(scheduler.take_launch_receiver().is_some());
    assert!(scheduler.take_launch_receiver().is_none());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        launch_dedupe_capacity: 0,
        ..SchedulerConfig::default()
    };
    assert!(SchedulerBuilder::new(cfg).build().is_err());
}

#[test]
fn test_file_backends_survive_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SchedulerConfig {
        store: StoreBackendConfig::File {
            path: dir.path().join("store"),
        },
        bus: BusBackendConfig::File {
            path: dir.path().join("bus"),
        },
        ..SchedulerConfig::default()
    };

    let first = SchedulerBuilder::new(cfg.clone()).build().unwrap();
    first.core().add_schedule(&schedule()).unwrap();
    first.core().enable_schedule(&schedule().schedule_id()).unwrap();
    drop(first);

    let second = SchedulerBuilder::new(cfg).build().unwrap();
    assert_eq!(
        second.core().get_schedule_status(&schedule().schedule_id()).unwrap(),
        ProgramScheduleStatus::Scheduled
    );
}
