//! Assemble a scheduler from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

use crate::config::{BusBackendConfig, SchedulerConfig, StoreBackendConfig};
use crate::core::AppResult;
use crate::infra::{
    FileMessagingService, InMemoryBackend, InMemoryMessagingService, JsonlBackend, MessagingService, Store,
    StoreBackend,
};
use crate::runtime::{
    ConstraintChecker, NotificationHandler, OutboxRelay, PartitionEventHandler, ProgramStatusPersistHandler,
    ProgramStatusTriggerHandler, SchedulerRuntime, SubscriberLoop, TimeEventHandler, TimeEventPublisher,
    TokioSpawner,
};
use crate::scheduler::{ChannelLauncher, CoreScheduler, JobQueue, LaunchRequest, ProgramLauncher};
use crate::state::{DirectStoreProgramStateWriter, MessagingProgramStateWriter};
use crate::util::RetryPolicy;

/// Stream name of the store's commit log inside a file backend directory.
const STORE_STREAM: &str = "store";

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    launcher: Option<Arc<dyn ProgramLauncher>>,
    store_backend: Option<Arc<dyn StoreBackend>>,
    bus: Option<Arc<dyn MessagingService>>,
}

impl SchedulerBuilder {
    /// Builder over `config`. Backends default to the configured ones.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            launcher: None,
            store_backend: None,
            bus: None,
        }
    }

    /// Hand launches to `launcher` instead of a channel.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn ProgramLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Use `backend` for the store.
    #[must_use]
    pub fn with_store_backend(mut self, backend: Arc<dyn StoreBackend>) -> Self {
        self.store_backend = Some(backend);
        self
    }

    /// Use `bus` for notifications.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn MessagingService>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Validate configuration and open the backends.
    pub fn build(self) -> AppResult<Scheduler> {
        self.config
            .validate()
            .map_err(|e| anyhow::anyhow!("config invalid: {e}"))?;

        let backend: Arc<dyn StoreBackend> = match (self.store_backend, &self.config.store) {
            (Some(backend), _) => backend,
            (None, StoreBackendConfig::InMemory) => Arc::new(InMemoryBackend::new()),
            (None, StoreBackendConfig::File { path }) => Arc::new(
                JsonlBackend::new(path, STORE_STREAM)
                    .with_context(|| format!("opening store log in {}", path.display()))?,
            ),
        };
        let store = Store::open(backend).context("replaying store log")?;

        let bus: Arc<dyn MessagingService> = match (self.bus, &self.config.bus) {
            (Some(bus), _) => bus,
            (None, BusBackendConfig::InMemory) => Arc::new(InMemoryMessagingService::new()),
            (None, BusBackendConfig::File { path }) => Arc::new(
                FileMessagingService::new(path)
                    .with_context(|| format!("opening bus in {}", path.display()))?,
            ),
        };

        let (launcher, launches) = match self.launcher {
            Some(launcher) => (launcher, None),
            None => {
                let (launcher, rx) = ChannelLauncher::new(self.config.launch_dedupe_capacity);
                (Arc::new(launcher) as Arc<dyn ProgramLauncher>, Some(rx))
            }
        };
        let queue = Arc::new(JobQueue::new(launcher));
        let core = CoreScheduler::new(store.clone(), queue.clone(), RetryPolicy::from(&self.config.admin_retry));
        tracing::info!("scheduler {} built", self.config.consumer_name);

        Ok(Scheduler {
            config: self.config,
            store,
            bus,
            queue,
            core,
            launches,
        })
    }
}

/// Assembled scheduler components.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Store,
    bus: Arc<dyn MessagingService>,
    queue: Arc<JobQueue>,
    core: CoreScheduler,
    launches: Option<UnboundedReceiver<LaunchRequest>>,
}

impl Scheduler {
    /// Administrative API.
    pub const fn core(&self) -> &CoreScheduler {
        &self.core
    }

    /// Shared store.
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Notification bus.
    pub fn bus(&self) -> Arc<dyn MessagingService> {
        self.bus.clone()
    }

    /// Job queue.
    pub fn job_queue(&self) -> Arc<JobQueue> {
        self.queue.clone()
    }

    /// Effective configuration.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Receiver of launch requests when no launcher was supplied. Yields `None` after
    /// the first call.
    pub fn take_launch_receiver(&mut self) -> Option<UnboundedReceiver<LaunchRequest>> {
        self.launches.take()
    }

    /// State writer publishing onto the program-status topic.
    pub fn program_state_writer(&self) -> MessagingProgramStateWriter {
        MessagingProgramStateWriter::new(
            self.bus.clone(),
            self.config.topics.program_status.clone(),
            RetryPolicy::from(&self.config.writer_retry),
        )
    }

    /// State writer recording runs directly in the store.
    pub fn direct_state_writer(&self) -> DirectStoreProgramStateWriter {
        DirectStoreProgramStateWriter::new(self.store.clone(), RetryPolicy::from(&self.config.writer_retry))
    }

    fn subscriber(&self, topic: &str, handler: Arc<dyn NotificationHandler>) -> SubscriberLoop {
        SubscriberLoop::new(
            self.config.consumer_name.clone(),
            topic,
            self.store.clone(),
            self.bus.clone(),
            self.queue.clone(),
            handler,
            self.config.subscriber.clone(),
        )
    }

    /// Spawn subscriber loops and background services.
    pub fn start(&self, spawner: &TokioSpawner) -> SchedulerRuntime {
        let cfg = &self.config;
        let topics = &cfg.topics;
        let mut runtime = SchedulerRuntime::new(spawner.clone());
        let committed = Arc::new(Notify::new());

        runtime.spawn_subscriber(self.subscriber(&topics.time, Arc::new(TimeEventHandler::new(self.queue.clone()))));
        runtime.spawn_subscriber(self.subscriber(&topics.data, Arc::new(PartitionEventHandler::new(self.queue.clone()))));
        runtime.spawn_subscriber(self.subscriber(
            &topics.program_status_trigger,
            Arc::new(ProgramStatusTriggerHandler::new(self.queue.clone())),
        ));
        runtime.spawn_subscriber(
            self.subscriber(
                &topics.program_status,
                Arc::new(ProgramStatusPersistHandler::new(topics.program_status_trigger.clone())),
            )
            .with_commit_signal(committed.clone()),
        );

        let relay = OutboxRelay::new(self.store.clone(), self.bus.clone(), cfg.outbox.clone(), committed);
        runtime.spawn_task("outbox", |cancel| relay.run(cancel));

        if cfg.time_events.enabled {
            let publisher =
                TimeEventPublisher::new(self.store.clone(), self.bus.clone(), topics.time.clone(), cfg.time_events.clone());
            runtime.spawn_task("time_events", |cancel| publisher.run(cancel));
        }
        if cfg.constraint_check.enabled {
            let checker = ConstraintChecker::new(
                self.store.clone(),
                self.queue.clone(),
                RetryPolicy::from(&cfg.admin_retry),
                Duration::from_millis(cfg.constraint_check.interval_ms),
            );
            runtime.spawn_task("constraint_check", |cancel| checker.run(cancel));
        }
        tracing::info!(
            "scheduler {} started with tasks {:?}",
            cfg.consumer_name,
            runtime.task_names()
        );
        runtime
    }
}
