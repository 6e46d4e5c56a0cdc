//! Periodic re-check of jobs waiting on constraints, followed by a handoff of every
//! committed launch. Launches the launcher rejected earlier are retried here.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::SchedulerError;
use crate::infra::Store;
use crate::scheduler::JobQueue;
use crate::util::{now_ms, RetryPolicy};

/// Re-evaluates PENDING_CONSTRAINT and PENDING_LAUNCH jobs.
pub struct ConstraintChecker {
    store: Store,
    queue: Arc<JobQueue>,
    retry: RetryPolicy,
    interval: Duration,
}

impl ConstraintChecker {
    /// Checker running every `interval`.
    pub const fn new(store: Store, queue: Arc<JobQueue>, retry: RetryPolicy, interval: Duration) -> Self {
        Self {
            store,
            queue,
            retry,
            interval,
        }
    }

    /// One pass. Returns the number of launches handed off.
    pub async fn check_once(&self) -> Result<usize, SchedulerError> {
        let staged = self
            .store
            .execute_with_retry_async(&self.retry, "recheck_pending", |tx| {
                self.queue.recheck_pending(tx, now_ms())
            })
            .await?;
        if staged > 0 {
            tracing::debug!("constraint check cleared {} jobs", staged);
        }
        self.queue.dispatch_launches(&self.store)
    }

    /// Check on every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("constraint checker started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            match self.check_once().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("constraint check launched {} jobs", n),
                Err(e) => tracing::warn!("constraint check failed: {}", e),
            }
        }
        tracing::info!("constraint checker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        ApplicationId, Constraint, DatasetId, JobState, Notification, ProgramSchedule, ProgramScheduleStatus,
        ProgramType, Trigger,
    };
    use crate::core::LaunchError;
    use crate::scheduler::{ChannelLauncher, LaunchRequest, ProgramLauncher, ScheduleStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn check_once_launches_elapsed_jobs() {
        let store = Store::in_memory();
        let (launcher, mut rx) = ChannelLauncher::new(16);
        let queue = Arc::new(JobQueue::new(Arc::new(launcher)));
        let dataset = DatasetId::new("ns", "pfs");
        let schedule = ProgramSchedule::new(
            "delayed",
            "",
            ApplicationId::new("ns", "app").program(ProgramType::Workflow, "wf"),
            Trigger::partition(dataset.clone(), 1),
        )
        .with_constraint(Constraint::Delay { delay_ms: 20 });
        let id = schedule.schedule_id();
        let record = store
            .execute(|tx| {
                ScheduleStore.add(tx, &schedule, ProgramScheduleStatus::Scheduled, 0)?;
                ScheduleStore.get_record(tx, &id)
            })
            .unwrap();
        let n = Notification::partition(&dataset, &[]).unwrap();
        store
            .execute(|tx| queue.add_notification(tx, &record, &n, now_ms()))
            .unwrap();
        let job = store.read(|tx| queue.get_job(tx, &id)).unwrap().unwrap();
        assert_eq!(job.state, JobState::PendingConstraint);

        let checker = ConstraintChecker::new(store.clone(), queue.clone(), RetryPolicy::none(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(checker.check_once().await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().schedule_id, id);
        assert!(store.read(|tx| queue.get_job(tx, &id)).unwrap().is_none());
        assert_eq!(checker.check_once().await.unwrap(), 0);
    }

    struct FlakyLauncher {
        inner: ChannelLauncher,
        rejections: AtomicU32,
    }

    impl ProgramLauncher for FlakyLauncher {
        fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError> {
            let rejected = self
                .rejections
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(LaunchError::Rejected("cluster busy".into()));
            }
            self.inner.launch(request)
        }
    }

    #[tokio::test]
    async fn rejected_launch_is_retried_on_next_pass() {
        let store = Store::in_memory();
        let (inner, mut rx) = ChannelLauncher::new(16);
        let launcher = FlakyLauncher {
            inner,
            rejections: AtomicU32::new(1),
        };
        let queue = Arc::new(JobQueue::new(Arc::new(launcher)));
        let dataset = DatasetId::new("ns", "pfs");
        let schedule = ProgramSchedule::new(
            "busy",
            "",
            ApplicationId::new("ns", "app").program(ProgramType::Workflow, "wf"),
            Trigger::partition(dataset.clone(), 1),
        );
        let id = schedule.schedule_id();
        let record = store
            .execute(|tx| {
                ScheduleStore.add(tx, &schedule, ProgramScheduleStatus::Scheduled, 0)?;
                ScheduleStore.get_record(tx, &id)
            })
            .unwrap();
        let n = Notification::partition(&dataset, &[]).unwrap();
        store
            .execute(|tx| queue.add_notification(tx, &record, &n, now_ms()))
            .unwrap();

        let checker = ConstraintChecker::new(
            store.clone(),
            queue.clone(),
            RetryPolicy::fixed(3, Duration::from_millis(1)),
            Duration::from_millis(5),
        );
        assert_eq!(checker.check_once().await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(
            store
                .read(|tx| queue.jobs_in_state(tx, JobState::PendingLaunch))
                .unwrap()
                .len(),
            1
        );

        assert_eq!(checker.check_once().await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().schedule_id, id);
        assert!(store
            .read(|tx| queue.jobs_in_state(tx, JobState::PendingLaunch))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (launcher, _rx) = ChannelLauncher::new(16);
        let queue = Arc::new(JobQueue::new(Arc::new(launcher)));
        let checker = ConstraintChecker::new(Store::in_memory(), queue, RetryPolicy::none(), Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(checker.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
