//! Optimistic transactions over a store snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::infra::store::{Mutation, StoreState, Table};

/// Unit of work against a [`Store`](crate::infra::store::Store).
///
/// Reads come from the snapshot taken at `begin` overlaid with this transaction's own
/// writes. Every key read or written and every prefix scanned is remembered, and the
/// commit fails with [`SchedulerError::TransactionConflict`] if any of them changed
/// after the snapshot was taken.
pub struct Transaction {
    snapshot: Arc<StoreState>,
    writes: BTreeMap<(Table, String), Option<serde_json::Value>>,
    reads: BTreeSet<(Table, String)>,
    scans: BTreeSet<(Table, String)>,
}

/// Writes of a transaction at one point, restorable with [`Transaction::rollback_to`].
#[derive(Debug, Clone)]
pub struct Savepoint {
    writes: BTreeMap<(Table, String), Option<serde_json::Value>>,
}

fn decode<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, SchedulerError> {
    T::deserialize(value).map_err(|e| SchedulerError::Storage(format!("undecodable row: {e}")))
}

impl Transaction {
    pub(crate) fn new(snapshot: Arc<StoreState>) -> Self {
        Self {
            snapshot,
            writes: BTreeMap::new(),
            reads: BTreeSet::new(),
            scans: BTreeSet::new(),
        }
    }

    /// Version of the snapshot this transaction reads from.
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot.version
    }

    /// Whether nothing was written.
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    /// Mark the writes made so far.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            writes: self.writes.clone(),
        }
    }

    /// Discard every write made after `savepoint`. Keys read since then stay tracked
    /// for the conflict check.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.writes = savepoint.writes;
    }

    /// Read a row.
    pub fn get<T: DeserializeOwned>(&mut self, table: Table, key: &str) -> Result<Option<T>, SchedulerError> {
        if let Some(pending) = self.writes.get(&(table, key.to_string())) {
            return pending.as_ref().map(decode).transpose();
        }
        self.reads.insert((table, key.to_string()));
        self.snapshot
            .row(table, key)
            .and_then(|row| row.value.as_ref())
            .map(decode)
            .transpose()
    }

    /// Whether a row exists.
    pub fn contains(&mut self, table: Table, key: &str) -> Result<bool, SchedulerError> {
        Ok(self.get::<serde_json::Value>(table, key)?.is_some())
    }

    /// Insert or replace a row.
    pub fn put<T: Serialize>(&mut self, table: Table, key: impl Into<String>, value: &T) -> Result<(), SchedulerError> {
        let value = serde_json::to_value(value)?;
        self.writes.insert((table, key.into()), Some(value));
        Ok(())
    }

    /// Delete a row. Deleting a missing row is a no-op write.
    pub fn delete(&mut self, table: Table, key: impl Into<String>) {
        self.writes.insert((table, key.into()), None);
    }

    /// All rows whose key starts with `prefix`, in key order.
    pub fn scan_prefix<T: DeserializeOwned>(
        &mut self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, SchedulerError> {
        self.scan_after(table, prefix, None, usize::MAX)
    }

    /// Up to `limit` rows with `prefix` whose key sorts after `after`.
    pub fn scan_after<T: DeserializeOwned>(
        &mut self,
        table: Table,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, T)>, SchedulerError> {
        self.scans.insert((table, prefix.to_string()));
        let lower = match after {
            Some(after) if after >= prefix => Bound::Excluded(after),
            _ => Bound::Included(prefix),
        };
        let in_range = |key: &str| {
            key.starts_with(prefix)
                && match lower {
                    Bound::Excluded(a) => key > a,
                    _ => true,
                }
        };

        let mut merged: BTreeMap<&str, &serde_json::Value> = BTreeMap::new();
        if let Some(rows) = self.snapshot.tables.get(&table) {
            for (key, row) in rows.range::<str, _>((lower, Bound::Unbounded)) {
                if !key.starts_with(prefix) {
                    break;
                }
                if let Some(value) = &row.value {
                    merged.insert(key.as_str(), value);
                }
            }
        }
        for ((t, key), value) in &self.writes {
            if *t != table || !in_range(key) {
                continue;
            }
            match value {
                Some(value) => {
                    merged.insert(key.as_str(), value);
                }
                None => {
                    merged.remove(key.as_str());
                }
            }
        }
        merged
            .into_iter()
            .take(limit)
            .map(|(key, value)| Ok((key.to_string(), decode(value)?)))
            .collect()
    }

    /// First key of the snapshot that changed after it was taken, if any.
    pub(crate) fn find_conflict(&self, current: &StoreState) -> Option<String> {
        let base = self.snapshot.version;
        if current.version == base {
            return None;
        }
        let changed = |table: Table, key: &str| {
            current
                .row(table, key)
                .is_some_and(|row| row.version > base)
        };
        for (table, key) in self.reads.iter().chain(self.writes.keys()) {
            if changed(*table, key) {
                return Some(format!("{table}/{key}"));
            }
        }
        for (table, prefix) in &self.scans {
            if let Some(rows) = current.tables.get(table) {
                let hit = rows
                    .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
                    .take_while(|(key, _)| key.starts_with(prefix.as_str()))
                    .find(|(_, row)| row.version > base);
                if let Some((key, _)) = hit {
                    return Some(format!("{table}/{key}"));
                }
            }
        }
        None
    }

    pub(crate) fn into_mutations(self) -> Vec<Mutation> {
        self.writes
            .into_iter()
            .map(|((table, key), value)| Mutation { table, key, value })
            .collect()
    }
}

/// Durable monotonically increasing counter value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub(crate) struct Counter {
    pub(crate) next: u64,
}

impl Transaction {
    /// Take the next value of a durable counter.
    ///
    /// The increment commits with the transaction, so a retried transaction sees the
    /// same value again.
    pub fn next_sequence(&mut self, name: &str) -> Result<u64, SchedulerError> {
        let mut counter = self.get::<Counter>(Table::Counters, name)?.unwrap_or_default();
        let value = counter.next;
        counter.next += 1;
        self.put(Table::Counters, name, &counter)?;
        Ok(value)
    }
}
