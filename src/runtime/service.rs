//! Running scheduler: background tasks, shutdown and progress tracking.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::SchedulerError;
use crate::infra::MessageId;
use crate::runtime::subscriber::SubscriberLoop;
use crate::runtime::tokio_spawner::TokioSpawner;

/// Handle over the scheduler's spawned tasks.
pub struct SchedulerRuntime {
    spawner: TokioSpawner,
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    progress: HashMap<String, watch::Receiver<Option<MessageId>>>,
}

impl SchedulerRuntime {
    /// Empty runtime spawning on `spawner`.
    pub fn new(spawner: TokioSpawner) -> Self {
        Self {
            spawner,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            progress: HashMap::new(),
        }
    }

    /// Token cancelled on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a subscriber and track its progress under its topic.
    pub fn spawn_subscriber(&mut self, subscriber: SubscriberLoop) {
        let topic = subscriber.topic().to_string();
        self.progress.insert(topic.clone(), subscriber.subscribe_progress());
        let handle = self.spawner.spawn(subscriber.run(self.cancel.child_token()));
        self.tasks.push((format!("subscriber:{topic}"), handle));
    }

    /// Spawn a background task that stops when the given token is cancelled.
    pub fn spawn_task<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = self.spawner.spawn(task(self.cancel.child_token()));
        self.tasks.push((name.into(), handle));
    }

    /// Names of the spawned tasks.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Progress receiver of the subscriber on `topic`.
    pub fn progress(&self, topic: &str) -> Option<watch::Receiver<Option<MessageId>>> {
        self.progress.get(topic).cloned()
    }

    /// Wait until the subscriber on `topic` has committed `id` or anything later.
    pub async fn wait_until_processed(
        &self,
        topic: &str,
        id: &MessageId,
        timeout: Duration,
    ) -> Result<(), SchedulerError> {
        let mut rx = self
            .progress(topic)
            .ok_or_else(|| SchedulerError::NotFound(format!("no subscriber on {topic}")))?;
        let wait = rx.wait_for(|committed| committed.is_some_and(|c| c >= *id));
        let result = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SchedulerError::Messaging(format!("subscriber on {topic} stopped"))),
            Err(_) => Err(SchedulerError::Messaging(format!(
                "timed out waiting for {topic} to reach {id}"
            ))),
        };
        result
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                tracing::error!("task {} ended abnormally: {}", name, e);
            }
        }
        tracing::info!("scheduler runtime stopped");
    }
}
