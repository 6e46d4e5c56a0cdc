//! File-backed bus storing each topic as JSON lines.

use std::collections::HashMap;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::SchedulerError;
use crate::infra::bus::{Message, MessageId, MessagingService, TopicLog};

/// Bus persisting `<dir>/<topic>.jsonl`. Topics are loaded on first use.
#[derive(Debug)]
pub struct FileMessagingService {
    path: PathBuf,
    topics: Mutex<HashMap<String, TopicLog>>,
}

impl FileMessagingService {
    /// Open a bus rooted at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        create_dir_all(&path).map_err(|e| SchedulerError::Messaging(e.to_string()))?;
        Ok(Self {
            path,
            topics: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, topic: &str) -> PathBuf {
        self.path.join(format!("{topic}.jsonl"))
    }

    fn load_topic(&self, topic: &str) -> Result<TopicLog, SchedulerError> {
        let file_path = self.file_path(topic);
        if !file_path.exists() {
            return Ok(TopicLog::default());
        }
        let file = OpenOptions::new()
            .read(true)
            .open(&file_path)
            .map_err(|e| SchedulerError::Messaging(e.to_string()))?;
        let mut messages = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| SchedulerError::Messaging(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!("skipping unreadable message in {}: {}", file_path.display(), e),
            }
        }
        Ok(TopicLog::from_messages(messages))
    }

    fn append_to_disk(&self, topic: &str, message: &Message) -> Result<(), SchedulerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(topic))
            .map_err(|e| SchedulerError::Messaging(e.to_string()))?;
        let line = serde_json::to_string(message)?;
        writeln!(file, "{line}").map_err(|e| SchedulerError::Messaging(e.to_string()))
    }

    fn with_topic<T>(&self, topic: &str, f: impl FnOnce(&mut TopicLog) -> Result<T, SchedulerError>) -> Result<T, SchedulerError> {
        let mut topics = self.topics.lock();
        if !topics.contains_key(topic) {
            let log = self.load_topic(topic)?;
            topics.insert(topic.to_string(), log);
        }
        match topics.get_mut(topic) {
            Some(log) => f(log),
            None => Err(SchedulerError::Messaging(format!("topic {topic} unavailable"))),
        }
    }
}

#[async_trait]
impl MessagingService for FileMessagingService {
    async fn publish(&self, topic: &str, payload: String) -> Result<MessageId, SchedulerError> {
        self.with_topic(topic, |log| {
            let message = Message {
                id: log.next_id(),
                payload,
            };
            self.append_to_disk(topic, &message)?;
            let id = message.id;
            log.push(message);
            Ok(id)
        })
    }

    async fn fetch(
        &self,
        topic: &str,
        after: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, SchedulerError> {
        self.with_topic(topic, |log| Ok(log.fetch(after, limit)))
    }
}
