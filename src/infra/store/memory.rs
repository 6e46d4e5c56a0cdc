//! In-memory commit log for development and tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::SchedulerError;
use crate::infra::store::{CommitEntry, StoreBackend};

/// Commit log kept in memory. Clones share the same log, so a store can be
/// reopened from it to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    entries: Arc<Mutex<Vec<CommitEntry>>>,
}

impl InMemoryBackend {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently in the log.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StoreBackend for InMemoryBackend {
    fn load(&self) -> Result<Vec<CommitEntry>, SchedulerError> {
        Ok(self.entries.lock().clone())
    }

    fn append(&self, entry: &CommitEntry) -> Result<(), SchedulerError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn rewrite(&self, entries: &[CommitEntry]) -> Result<(), SchedulerError> {
        *self.entries.lock() = entries.to_vec();
        Ok(())
    }
}
