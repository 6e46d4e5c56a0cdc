//! Benchmarks for the scheduling hot path.
//!
//! Benchmarks cover:
//! - Notification accumulation on a pending job
//! - Threshold launches staged and dispatched through the channel launcher
//! - Subscriber-style fan-out of one notification to many schedules

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use prometheus_scheduler::core::{
    ApplicationId, DatasetId, Notification, PartitionKey, PartitionTrigger, ProgramSchedule, ProgramScheduleRecord,
    ProgramScheduleStatus, ProgramType, Trigger,
};
use prometheus_scheduler::infra::Store;
use prometheus_scheduler::scheduler::{ChannelLauncher, JobQueue, LaunchRequest, ScheduleStore};
use tokio::sync::mpsc::UnboundedReceiver;
use prometheus_scheduler::util::now_ms;

// ============================================================================
// Helper Functions
// ============================================================================

fn dataset() -> DatasetId {
    DatasetId::new("bench", "events")
}

fn partition_notification(i: u64) -> Notification {
    let mut key = PartitionKey::new();
    key.insert("seq".into(), i.to_string());
    Notification::partition(&dataset(), &[key]).expect("serializable partition key")
}

fn enabled_schedules(store: &Store, count: usize, threshold: u32) -> Vec<ProgramScheduleRecord> {
    let app = ApplicationId::new("bench", "app");
    store
        .execute(|tx| {
            let mut records = Vec::with_capacity(count);
            for i in 0..count {
                let schedule = ProgramSchedule::new(
                    format!("psched{i}"),
                    "",
                    app.program(ProgramType::Workflow, "wf"),
                    Trigger::partition(dataset(), threshold),
                );
                ScheduleStore.add(tx, &schedule, ProgramScheduleStatus::Scheduled, 0)?;
                records.push(ScheduleStore.get_record(tx, &schedule.schedule_id())?);
            }
            Ok(records)
        })
        .expect("schedules committed")
}

fn queue() -> (Arc<JobQueue>, UnboundedReceiver<LaunchRequest>) {
    let (launcher, rx) = ChannelLauncher::new(10_000);
    (Arc::new(JobQueue::new(Arc::new(launcher))), rx)
}

// ============================================================================
// Job Queue Benchmarks
// ============================================================================

fn bench_accumulate_notifications(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_queue_accumulate");

    for size in [100u64, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let store = Store::in_memory();
                let (queue, _rx) = queue();
                let record = enabled_schedules(&store, 1, u32::MAX).remove(0);
                for i in 0..size {
                    let progress = store
                        .execute(|tx| queue.add_notification(tx, &record, &partition_notification(i), now_ms()))
                        .unwrap();
                    black_box(progress);
                }
            });
        });
    }
    group.finish();
}

fn bench_threshold_launches(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_queue_threshold_launch");

    for threshold in [1u32, 10, 50] {
        let notifications = 500u64;
        group.throughput(Throughput::Elements(notifications));
        group.bench_with_input(BenchmarkId::from_parameter(threshold), &threshold, |b, &threshold| {
            b.iter(|| {
                let store = Store::in_memory();
                let (queue, mut rx) = queue();
                let record = enabled_schedules(&store, 1, threshold).remove(0);
                for i in 0..notifications {
                    store
                        .execute(|tx| queue.add_notification(tx, &record, &partition_notification(i), now_ms()))
                        .unwrap();
                }
                queue.dispatch_launches(&store).unwrap();
                let mut launched = 0;
                while rx.try_recv().is_ok() {
                    launched += 1;
                }
                black_box(launched);
            });
        });
    }
    group.finish();
}

// ============================================================================
// Fan-out Benchmarks
// ============================================================================

fn bench_partition_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_fan_out");

    for schedules in [10usize, 100] {
        group.throughput(Throughput::Elements(schedules as u64));
        group.bench_with_input(BenchmarkId::from_parameter(schedules), &schedules, |b, &schedules| {
            let store = Store::in_memory();
            let (queue, _rx) = queue();
            enabled_schedules(&store, schedules, 100);
            let key = PartitionTrigger::key_for(&dataset());
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let n = partition_notification(i);
                store
                    .execute(|tx| {
                        for record in ScheduleStore.find_by_trigger_key(tx, &key)? {
                            queue.add_notification(tx, &record, &n, now_ms())?;
                        }
                        Ok(())
                    })
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_accumulate_notifications,
    bench_threshold_launches,
    bench_partition_fan_out,
);
criterion_main!(benches);
