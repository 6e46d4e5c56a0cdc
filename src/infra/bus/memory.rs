//! In-memory bus for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::SchedulerError;
use crate::infra::bus::{Message, MessageId, MessagingService, TopicLog};

/// Bus keeping every topic in memory.
#[derive(Debug, Default)]
pub struct InMemoryMessagingService {
    topics: Mutex<HashMap<String, TopicLog>>,
}

impl InMemoryMessagingService {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn publish(&self, topic: &str, payload: String) -> Result<MessageId, SchedulerError> {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        let id = log.next_id();
        log.push(Message { id, payload });
        Ok(id)
    }

    async fn fetch(
        &self,
        topic: &str,
        after: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, SchedulerError> {
        Ok(self
            .topics
            .lock()
            .get(topic)
            .map(|log| log.fetch(after, limit))
            .unwrap_or_default())
    }
}
