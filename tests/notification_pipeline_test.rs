//! End-to-end tests of the notification pipeline.
//!
//! Each test builds a scheduler, starts its background tasks and drives it by
//! publishing notifications onto the bus:
//! 1. Partition thresholds launch exactly once and reset
//! 2. Disabling discards the pending job and nothing carries over
//! 3. Updating discards the pending job and launches under the new definition
//! 4. Deleting and re-adding a schedule starts from an empty job
//! 5. Program status triggers fire only for accepted statuses
//! 6. FAILED statuses persist their cause and re-trigger only matching schedules

use std::time::Duration;

use rand::Rng;

use prometheus_scheduler::builders::{Scheduler, SchedulerBuilder};
use prometheus_scheduler::config::{OutboxConfig, SchedulerConfig, SubscriberConfig, TimeEventConfig};
use prometheus_scheduler::core::{
    ApplicationId, BasicThrowable, DatasetId, JobState, Notification, PartitionKey, ProgramId, ProgramRunId,
    ProgramRunStatus, ProgramSchedule, ProgramStatus, ProgramType, ScheduleId, Trigger,
};
use prometheus_scheduler::infra::MessageId;
use prometheus_scheduler::runtime::{SchedulerRuntime, TokioSpawner};
use prometheus_scheduler::scheduler::SCHEDULE_NAME_ARG;
use prometheus_scheduler::state::{ProgramStateWriter, RunStore};

const WAIT: Duration = Duration::from_secs(10);

fn config() -> SchedulerConfig {
    SchedulerConfig {
        subscriber: SubscriberConfig {
            batch_size: 10,
            poll_interval_ms: 10,
            error_backoff_ms: 10,
        },
        time_events: TimeEventConfig {
            enabled: false,
            ..TimeEventConfig::default()
        },
        outbox: OutboxConfig {
            interval_ms: 10,
            ..OutboxConfig::default()
        },
        ..SchedulerConfig::default()
    }
}

fn app() -> ApplicationId {
    ApplicationId::new("ns", "app1")
}

fn dataset() -> DatasetId {
    DatasetId::new("ns", "pfs")
}

fn program(name: &str) -> ProgramId {
    app().program(ProgramType::Workflow, name)
}

async fn publish_partition(scheduler: &Scheduler, runtime: &SchedulerRuntime) -> MessageId {
    let topic = scheduler.config().topics.data.clone();
    let mut key = PartitionKey::new();
    key.insert("hour".into(), "00".into());
    let n = Notification::partition(&dataset(), &[key]).unwrap();
    let id = scheduler.bus().publish_notification(&topic, &n).await.unwrap();
    runtime.wait_until_processed(&topic, &id, WAIT).await.unwrap();
    id
}

fn pending_job(scheduler: &Scheduler, id: &ScheduleId) -> Option<(JobState, usize)> {
    let queue = scheduler.job_queue();
    scheduler
        .store()
        .read(|tx| queue.get_job(tx, id))
        .unwrap()
        .map(|job| (job.state, job.notifications.len()))
}

fn start(scheduler: &Scheduler) -> SchedulerRuntime {
    scheduler.start(&TokioSpawner::current().unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_partition_threshold_launches_once_and_resets() {
    let threshold: u32 = rand::rng().random_range(1..=5);
    let mut scheduler = SchedulerBuilder::new(config()).build().unwrap();
    let mut launches = scheduler.take_launch_receiver().unwrap();
    let schedule = ProgramSchedule::new("psched", "", program("wf1"), Trigger::partition(dataset(), threshold));
    let id = schedule.schedule_id();
    scheduler.core().add_schedule(&schedule).unwrap();
    scheduler.core().enable_schedule(&id).unwrap();
    let runtime = start(&scheduler);

    for round in 0..2u32 {
        for seen in 1..threshold {
            publish_partition(&scheduler, &runtime).await;
            assert!(launches.try_recv().is_err(), "launched before threshold {threshold}");
            assert_eq!(pending_job(&scheduler, &id), Some((JobState::PendingTrigger, seen as usize)));
        }
        publish_partition(&scheduler, &runtime).await;
        let request = launches.try_recv().expect("launch at threshold");
        assert_eq!(request.launch_id, format!("{id}#{round}"));
        assert_eq!(request.notifications.len(), threshold as usize);
        assert_eq!(request.system_args.get(SCHEDULE_NAME_ARG).map(String::as_str), Some("psched"));
        assert!(launches.try_recv().is_err());
        assert_eq!(pending_job(&scheduler, &id), None);
    }

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disable_discards_job_without_carry_over() {
    let mut scheduler = SchedulerBuilder::new(config()).build().unwrap();
    let mut launches = scheduler.take_launch_receiver().unwrap();
    let schedule = ProgramSchedule::new("psched", "", program("wf1"), Trigger::partition(dataset(), 2));
    let id = schedule.schedule_id();
    let core = scheduler.core().clone();
    core.add_schedule(&schedule).unwrap();
    core.enable_schedule(&id).unwrap();
    let runtime = start(&scheduler);

    publish_partition(&scheduler, &runtime).await;
    assert_eq!(pending_job(&scheduler, &id), Some((JobState::PendingTrigger, 1)));

    core.disable_schedule(&id).unwrap();
    assert_eq!(pending_job(&scheduler, &id), None);
    publish_partition(&scheduler, &runtime).await;
    assert_eq!(pending_job(&scheduler, &id), None);
    assert!(launches.try_recv().is_err());

    core.enable_schedule(&id).unwrap();
    publish_partition(&scheduler, &runtime).await;
    assert_eq!(pending_job(&scheduler, &id), Some((JobState::PendingTrigger, 1)));
    assert!(launches.try_recv().is_err());
    publish_partition(&scheduler, &runtime).await;
    assert_eq!(launches.try_recv().unwrap().schedule_id, id);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_discards_job_and_launches_new_definition() {
    let mut scheduler = SchedulerBuilder::new(config()).build().unwrap();
    let mut launches = scheduler.take_launch_receiver().unwrap();
    let schedule = ProgramSchedule::new("psched", "", program("wf1"), Trigger::partition(dataset(), 2));
    let id = schedule.schedule_id();
    let core = scheduler.core().clone();
    core.add_schedule(&schedule).unwrap();
    core.enable_schedule(&id).unwrap();
    let runtime = start(&scheduler);

    publish_partition(&scheduler, &runtime).await;
    assert_eq!(pending_job(&scheduler, &id), Some((JobState::PendingTrigger, 1)));

    let updated = ProgramSchedule::new("psched", "moved", program("wf2"), Trigger::partition(dataset(), 2));
    core.update_schedule(&updated).unwrap();
    assert_eq!(pending_job(&scheduler, &id), None);

    publish_partition(&scheduler, &runtime).await;
    assert!(launches.try_recv().is_err(), "partial job of the old definition carried over");
    assert_eq!(pending_job(&scheduler, &id), Some((JobState::PendingTrigger, 1)));

    publish_partition(&scheduler, &runtime).await;
    let request = launches.try_recv().expect("launch under the new definition");
    assert_eq!(request.program, program("wf2"));
    assert_eq!(request.notifications.len(), 2);
    assert!(launches.try_recv().is_err());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_and_readd_starts_from_empty_job() {
    let mut scheduler = SchedulerBuilder::new(config()).build().unwrap();
    let mut launches = scheduler.take_launch_receiver().unwrap();
    let schedule = ProgramSchedule::new("psched", "", program("wf1"), Trigger::partition(dataset(), 2));
    let id = schedule.schedule_id();
    let core = scheduler.core().clone();
    core.add_schedule(&schedule).unwrap();
    core.enable_schedule(&id).unwrap();
    let runtime = start(&scheduler);

    publish_partition(&scheduler, &runtime).await;
    assert_eq!(pending_job(&scheduler, &id), Some((JobState::PendingTrigger, 1)));

    core.delete_schedule(&id).unwrap();
    assert_eq!(pending_job(&scheduler, &id), None);
    let readded = ProgramSchedule::new("psched", "", program("wf3"), Trigger::partition(dataset(), 2));
    core.add_schedule(&readded).unwrap();
    core.enable_schedule(&id).unwrap();

    publish_partition(&scheduler, &runtime).await;
    assert!(launches.try_recv().is_err(), "partial job of the deleted schedule carried over");
    assert_eq!(pending_job(&scheduler, &id), Some((JobState::PendingTrigger, 1)));

    publish_partition(&scheduler, &runtime).await;
    let request = launches.try_recv().expect("launch of the re-added schedule");
    assert_eq!(request.program, program("wf3"));
    assert_eq!(request.notifications.len(), 2);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_program_status_trigger_respects_accepted_statuses() {
    let mut scheduler = SchedulerBuilder::new(config()).build().unwrap();
    let mut launches = scheduler.take_launch_receiver().unwrap();
    let upstream = program("up");
    let schedule = ProgramSchedule::new(
        "on-done",
        "",
        program("down"),
        Trigger::program_status(upstream.clone(), [ProgramStatus::Completed, ProgramStatus::Killed]),
    );
    scheduler.core().add_schedule(&schedule).unwrap();
    scheduler.core().enable_schedule(&schedule.schedule_id()).unwrap();
    let runtime = start(&scheduler);
    let topic = scheduler.config().topics.program_status_trigger.clone();

    for status in [ProgramRunStatus::Failed, ProgramRunStatus::Running] {
        let n = Notification::program_status(&upstream.run("r1"), status).unwrap();
        let id = scheduler.bus().publish_notification(&topic, &n).await.unwrap();
        runtime.wait_until_processed(&topic, &id, WAIT).await.unwrap();
        assert!(launches.try_recv().is_err(), "{status} must not trigger");
        assert_eq!(pending_job(&scheduler, &schedule.schedule_id()), None);
    }

    let n = Notification::program_status(&upstream.run("r2"), ProgramRunStatus::Killed).unwrap();
    let id = scheduler.bus().publish_notification(&topic, &n).await.unwrap();
    runtime.wait_until_processed(&topic, &id, WAIT).await.unwrap();
    let request = launches.try_recv().unwrap();
    assert_eq!(request.schedule_id, schedule.schedule_id());
    assert_eq!(request.notifications, vec![n]);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_status_round_trip() {
    let mut scheduler = SchedulerBuilder::new(config()).build().unwrap();
    let mut launches = scheduler.take_launch_receiver().unwrap();
    let upstream = program("up");
    let on_failed = ProgramSchedule::new(
        "on-failed",
        "",
        program("cleanup"),
        Trigger::program_status(upstream.clone(), [ProgramStatus::Failed]),
    );
    let on_completed = ProgramSchedule::new(
        "on-completed",
        "",
        program("report"),
        Trigger::program_status(upstream.clone(), [ProgramStatus::Completed]),
    );
    let core = scheduler.core();
    core.add_schedules(&[on_failed.clone(), on_completed.clone()]).unwrap();
    core.enable_schedule(&on_failed.schedule_id()).unwrap();
    core.enable_schedule(&on_completed.schedule_id()).unwrap();
    let runtime = start(&scheduler);

    let writer = scheduler.program_state_writer();
    let run = ProgramRunId::generate(&upstream);
    let cause = BasicThrowable::new("IllegalStateException", "boom");
    writer.start(&run, Some("twill-1"), 100).await.unwrap();
    writer.running(&run, Some("twill-1"), 110).await.unwrap();
    writer
        .stop(&run, 200, ProgramRunStatus::Failed, Some(&cause))
        .await
        .unwrap();

    let request = tokio::time::timeout(WAIT, launches.recv())
        .await
        .expect("launch in time")
        .expect("launch channel open");
    assert_eq!(request.schedule_id, on_failed.schedule_id());
    let trigger = &request.notifications[0];
    assert_eq!(trigger.program_run_id().unwrap(), run);
    assert_eq!(trigger.program_run_status().unwrap(), ProgramRunStatus::Failed);

    let record = scheduler
        .store()
        .read(|tx| RunStore.get(tx, &run))
        .unwrap()
        .expect("run record");
    assert_eq!(record.status, ProgramRunStatus::Failed);
    assert_eq!(record.failure_cause, Some(cause));
    assert_eq!(record.start_ms, Some(100));
    assert_eq!(record.stop_ms, Some(200));
    assert_eq!(record.runtime_run_id.as_deref(), Some("twill-1"));

    assert!(launches.try_recv().is_err());
    assert_eq!(pending_job(&scheduler, &on_completed.schedule_id()), None);

    runtime.shutdown().await;
}
