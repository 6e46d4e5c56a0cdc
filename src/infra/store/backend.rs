//! Commit log model shared by store backends.

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::infra::store::Table;

/// A single row change. `value: None` deletes the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target table.
    pub table: Table,
    /// Row key.
    pub key: String,
    /// New value, or `None` for a delete.
    pub value: Option<serde_json::Value>,
}

/// All mutations of one committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Store version produced by this commit.
    pub version: u64,
    /// Row changes, applied in order.
    pub mutations: Vec<Mutation>,
}

/// Durable commit log behind a [`Store`](crate::infra::store::Store).
pub trait StoreBackend: Send + Sync {
    /// Read every entry in commit order.
    fn load(&self) -> Result<Vec<CommitEntry>, SchedulerError>;
    /// Durably append one entry. The commit fails if this fails.
    fn append(&self, entry: &CommitEntry) -> Result<(), SchedulerError>;
    /// Replace the whole log, used by compaction.
    fn rewrite(&self, entries: &[CommitEntry]) -> Result<(), SchedulerError>;
}
