//! Notification bus: durable, ordered, per-topic append logs.

pub mod file;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Notification, SchedulerError};
use crate::util::now_ms;

pub use file::FileMessagingService;
pub use memory::InMemoryMessagingService;

/// Position of a message in its topic. Ordered by publish time, then sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    /// Publish time in milliseconds.
    pub publish_ms: i64,
    /// Sequence within the millisecond.
    pub sequence: u64,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.publish_ms, self.sequence)
    }
}

impl FromStr for MessageId {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.is_char_boundary(16) {
            return Err(SchedulerError::Storage(format!("bad message id `{s}`")));
        }
        let (publish, sequence) = s.split_at(16);
        let bad = |_| SchedulerError::Storage(format!("bad message id `{s}`"));
        Ok(Self {
            publish_ms: i64::from_str_radix(publish, 16).map_err(bad)?,
            sequence: u64::from_str_radix(sequence, 16).map_err(bad)?,
        })
    }
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the topic.
    pub id: MessageId,
    /// Serialized notification.
    pub payload: String,
}

/// Publish/fetch interface to the bus.
#[async_trait]
pub trait MessagingService: Send + Sync {
    /// Append `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: String) -> Result<MessageId, SchedulerError>;

    /// Up to `limit` messages of `topic` strictly after `after`, in publish order.
    async fn fetch(
        &self,
        topic: &str,
        after: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, SchedulerError>;

    /// Publish a notification in its wire form.
    async fn publish_notification(
        &self,
        topic: &str,
        notification: &Notification,
    ) -> Result<MessageId, SchedulerError> {
        let payload = notification.to_json()?;
        self.publish(topic, payload).await
    }
}

/// Ordered message log of one topic.
#[derive(Debug, Clone, Default)]
pub(crate) struct TopicLog {
    messages: Vec<Message>,
}

impl TopicLog {
    pub(crate) fn from_messages(mut messages: Vec<Message>) -> Self {
        messages.sort_by_key(|m| m.id);
        Self { messages }
    }

    /// Id for the next message, never sorting before the last one.
    pub(crate) fn next_id(&self) -> MessageId {
        let now = now_ms();
        match self.messages.last() {
            Some(last) if last.id.publish_ms >= now => MessageId {
                publish_ms: last.id.publish_ms,
                sequence: last.id.sequence + 1,
            },
            _ => MessageId {
                publish_ms: now,
                sequence: 0,
            },
        }
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn fetch(&self, after: Option<&MessageId>, limit: usize) -> Vec<Message> {
        let start = after.map_or(0, |after| self.messages.partition_point(|m| m.id <= *after));
        self.messages.iter().skip(start).take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_string_form_orders_like_id() {
        let a = MessageId { publish_ms: 1_700_000_000_000, sequence: 3 };
        let b = MessageId { publish_ms: 1_700_000_000_001, sequence: 0 };
        assert!(a.to_string() < b.to_string());
        assert_eq!(a.to_string().parse::<MessageId>().unwrap(), a);
        assert!("xyz".parse::<MessageId>().is_err());
    }

    #[test]
    fn topic_log_ids_are_monotonic() {
        let mut log = TopicLog::default();
        for i in 0..3 {
            let id = log.next_id();
            log.push(Message { id, payload: i.to_string() });
        }
        let all = log.fetch(None, 10);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
        let rest = log.fetch(Some(&all[0].id), 10);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].payload, "1");
    }
}
