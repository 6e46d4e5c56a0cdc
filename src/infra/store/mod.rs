//! Transactional durable store backing schedules, jobs, offsets and run records.
//!
//! State is a set of ordered key/value tables held in memory and rebuilt on open from a
//! commit log. Writers use optimistic concurrency: a [`Transaction`] records what it
//! observed and the commit is rejected if any of it changed concurrently.

pub mod backend;
pub mod file;
pub mod memory;
pub mod transaction;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::RetryPolicy;

pub use backend::{CommitEntry, Mutation, StoreBackend};
pub use file::JsonlBackend;
pub use memory::InMemoryBackend;
pub use transaction::{Savepoint, Transaction};

/// Logical tables of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Schedule records keyed by `ns:app:name`.
    Schedules,
    /// Trigger key to schedule index.
    TriggerIndex,
    /// Jobs keyed by job key.
    Jobs,
    /// Durable counters.
    Counters,
    /// Subscriber offsets keyed by `consumer/topic`.
    Offsets,
    /// Program run records.
    RunRecords,
    /// Notifications waiting to be relayed to the bus.
    Outbox,
    /// Committed launches waiting for handoff, keyed by launch id.
    Launches,
    /// Last published fire time per time schedule.
    TimeMarks,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Schedules => "schedules",
            Self::TriggerIndex => "trigger_index",
            Self::Jobs => "jobs",
            Self::Counters => "counters",
            Self::Offsets => "offsets",
            Self::RunRecords => "run_records",
            Self::Outbox => "outbox",
            Self::Launches => "launches",
            Self::TimeMarks => "time_marks",
        };
        f.write_str(name)
    }
}

/// A stored row. Deleted rows stay as tombstones so that conflict checks see them.
#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub(crate) version: u64,
    pub(crate) value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) version: u64,
    pub(crate) tables: BTreeMap<Table, BTreeMap<String, Row>>,
}

impl StoreState {
    pub(crate) fn row(&self, table: Table, key: &str) -> Option<&Row> {
        self.tables.get(&table).and_then(|rows| rows.get(key))
    }

    fn apply(&mut self, entry: &CommitEntry) {
        for mutation in &entry.mutations {
            self.tables.entry(mutation.table).or_default().insert(
                mutation.key.clone(),
                Row {
                    version: entry.version,
                    value: mutation.value.clone(),
                },
            );
        }
        self.version = self.version.max(entry.version);
    }

    fn snapshot_entry(&self) -> CommitEntry {
        let mutations = self
            .tables
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter().filter_map(|(key, row)| {
                    row.value.as_ref().map(|value| Mutation {
                        table: *table,
                        key: key.clone(),
                        value: Some(value.clone()),
                    })
                })
            })
            .collect();
        CommitEntry {
            version: self.version,
            mutations,
        }
    }
}

struct StoreInner {
    state: RwLock<Arc<StoreState>>,
    // Serializes commits and compaction. The state lock is only taken to read a
    // snapshot or to swap in applied mutations, never across a backend write.
    commit_lock: Mutex<()>,
    backend: Arc<dyn StoreBackend>,
}

/// Handle to the shared store. Clones refer to the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("version", &self.version()).finish()
    }
}

impl Store {
    /// Open a store, replaying the backend's commit log.
    pub fn open(backend: Arc<dyn StoreBackend>) -> Result<Self, SchedulerError> {
        let entries = backend.load()?;
        let mut state = StoreState::default();
        for entry in &entries {
            state.apply(entry);
        }
        tracing::info!("store opened at version {} ({} log entries)", state.version, entries.len());
        Ok(Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Arc::new(state)),
                commit_lock: Mutex::new(()),
                backend,
            }),
        })
    }

    /// Empty store over a fresh in-memory log.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Arc::new(StoreState::default())),
                commit_lock: Mutex::new(()),
                backend: Arc::new(InMemoryBackend::new()),
            }),
        }
    }

    /// Latest committed version.
    pub fn version(&self) -> u64 {
        self.inner.state.read().version
    }

    /// Start a transaction on the latest committed state.
    pub fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.inner.state.read()))
    }

    /// Commit a transaction, returning the new store version.
    ///
    /// The entry is appended to the backend before it becomes visible. Readers and
    /// `begin` keep working while the append is in flight.
    pub fn commit(&self, tx: Transaction) -> Result<u64, SchedulerError> {
        if tx.is_read_only() {
            return Ok(tx.snapshot_version());
        }
        let _serial = self.inner.commit_lock.lock();
        let entry = {
            let current = self.inner.state.read();
            if let Some(key) = tx.find_conflict(&current) {
                tracing::debug!("transaction conflict on {}", key);
                return Err(SchedulerError::TransactionConflict(key));
            }
            CommitEntry {
                version: current.version + 1,
                mutations: tx.into_mutations(),
            }
        };
        self.inner.backend.append(&entry)?;
        Arc::make_mut(&mut *self.inner.state.write()).apply(&entry);
        tracing::trace!("committed version {} ({} mutations)", entry.version, entry.mutations.len());
        Ok(entry.version)
    }

    /// Run `f` in a transaction and commit it. Nothing is committed if `f` fails.
    pub fn execute<T, F>(&self, f: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(&mut Transaction) -> Result<T, SchedulerError>,
    {
        let mut tx = self.begin();
        let value = f(&mut tx)?;
        self.commit(tx)?;
        Ok(value)
    }

    /// Like [`execute`](Self::execute), re-running `f` on retryable failures.
    ///
    /// Sleeps on the calling thread between attempts. Async callers use
    /// [`execute_with_retry_async`](Self::execute_with_retry_async).
    pub fn execute_with_retry<T, F>(&self, policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T, SchedulerError>
    where
        F: FnMut(&mut Transaction) -> Result<T, SchedulerError>,
    {
        policy.retry(operation, || self.execute(&mut f))
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), waiting on the tokio timer
    /// between attempts instead of blocking the thread.
    pub async fn execute_with_retry_async<T, F>(
        &self,
        policy: &RetryPolicy,
        operation: &str,
        mut f: F,
    ) -> Result<T, SchedulerError>
    where
        F: FnMut(&mut Transaction) -> Result<T, SchedulerError>,
    {
        policy
            .retry_async(operation, || std::future::ready(self.execute(&mut f)))
            .await
    }

    /// Run `f` against a snapshot, discarding any writes.
    pub fn read<T, F>(&self, f: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(&mut Transaction) -> Result<T, SchedulerError>,
    {
        let mut tx = self.begin();
        f(&mut tx)
    }

    /// Rewrite the commit log as a single snapshot of live rows.
    pub fn compact(&self) -> Result<(), SchedulerError> {
        let _serial = self.inner.commit_lock.lock();
        let snapshot = self.inner.state.read().snapshot_entry();
        self.inner.backend.rewrite(std::slice::from_ref(&snapshot))?;
        tracing::info!("compacted store to {} rows at version {}", snapshot.mutations.len(), snapshot.version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Backend whose first append waits until the test releases it.
    struct GatedBackend {
        inner: InMemoryBackend,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl StoreBackend for GatedBackend {
        fn load(&self) -> Result<Vec<CommitEntry>, SchedulerError> {
            self.inner.load()
        }

        fn append(&self, entry: &CommitEntry) -> Result<(), SchedulerError> {
            let gate = self.entered.lock().take();
            if let Some(entered) = gate {
                entered.send(()).ok();
                self.release.lock().recv().ok();
            }
            self.inner.append(entry)
        }

        fn rewrite(&self, entries: &[CommitEntry]) -> Result<(), SchedulerError> {
            self.inner.rewrite(entries)
        }
    }

    #[test]
    fn writes_are_visible_to_own_transaction() {
        let store = Store::in_memory();
        let mut tx = store.begin();
        tx.put(Table::Jobs, "a", &1u32).unwrap();
        assert_eq!(tx.get::<u32>(Table::Jobs, "a").unwrap(), Some(1));
        tx.delete(Table::Jobs, "a");
        assert_eq!(tx.get::<u32>(Table::Jobs, "a").unwrap(), None);
    }

    #[test]
    fn uncommitted_writes_are_discarded() {
        let store = Store::in_memory();
        let result: Result<(), _> = store.execute(|tx| {
            tx.put(Table::Jobs, "a", &1u32)?;
            Err(SchedulerError::NotFound("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.read(|tx| tx.get::<u32>(Table::Jobs, "a")).unwrap(), None);
    }

    #[test]
    fn concurrent_read_write_conflicts() {
        let store = Store::in_memory();
        store.execute(|tx| tx.put(Table::Jobs, "a", &1u32)).unwrap();

        let mut first = store.begin();
        let mut second = store.begin();
        let v: u32 = first.get(Table::Jobs, "a").unwrap().unwrap();
        first.put(Table::Jobs, "a", &(v + 1)).unwrap();
        let v: u32 = second.get(Table::Jobs, "a").unwrap().unwrap();
        second.put(Table::Jobs, "a", &(v + 10)).unwrap();

        store.commit(first).unwrap();
        assert!(matches!(
            store.commit(second),
            Err(SchedulerError::TransactionConflict(_))
        ));
        assert_eq!(store.read(|tx| tx.get::<u32>(Table::Jobs, "a")).unwrap(), Some(2));
    }

    #[test]
    fn scan_sees_phantom_inserts_and_deletes() {
        let store = Store::in_memory();
        store.execute(|tx| tx.put(Table::Schedules, "ns:app:a", &1u32)).unwrap();

        let mut scanner = store.begin();
        assert_eq!(scanner.scan_prefix::<u32>(Table::Schedules, "ns:app:").unwrap().len(), 1);
        scanner.put(Table::Counters, "x", &0u32).unwrap();

        store.execute(|tx| {
            tx.delete(Table::Schedules, "ns:app:a");
            Ok(())
        })
        .unwrap();
        assert!(store.commit(scanner).is_err());
    }

    #[test]
    fn scan_merges_overlay_in_key_order() {
        let store = Store::in_memory();
        store
            .execute(|tx| {
                tx.put(Table::Jobs, "p/b", &2u32)?;
                tx.put(Table::Jobs, "p/d", &4u32)?;
                tx.put(Table::Jobs, "q/a", &9u32)
            })
            .unwrap();
        let mut tx = store.begin();
        tx.put(Table::Jobs, "p/a", &1u32).unwrap();
        tx.delete(Table::Jobs, "p/d");
        tx.put(Table::Jobs, "p/c", &3u32).unwrap();
        let rows: Vec<u32> = tx
            .scan_prefix(Table::Jobs, "p/")
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(rows, vec![1, 2, 3]);
        let page = tx.scan_after::<u32>(Table::Jobs, "p/", Some("p/a"), 1).unwrap();
        assert_eq!(page, vec![("p/b".to_string(), 2)]);
    }

    #[test]
    fn reads_proceed_while_commit_is_appending() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Store::open(Arc::new(GatedBackend {
            inner: InMemoryBackend::new(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        }))
        .unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.execute(|tx| tx.put(Table::Jobs, "a", &1u32)))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(store.version(), 0);
        assert_eq!(store.read(|tx| tx.get::<u32>(Table::Jobs, "a")).unwrap(), None);
        let mut reader = store.begin();
        assert_eq!(reader.get::<u32>(Table::Jobs, "a").unwrap(), None);

        release_tx.send(()).unwrap();
        writer.join().unwrap().unwrap();
        assert_eq!(store.version(), 1);
        assert_eq!(store.read(|tx| tx.get::<u32>(Table::Jobs, "a")).unwrap(), Some(1));
        reader.put(Table::Jobs, "a", &2u32).unwrap();
        assert!(matches!(store.commit(reader), Err(SchedulerError::TransactionConflict(_))));
    }

    #[tokio::test]
    async fn async_retry_reruns_conflicted_transactions() {
        let store = Store::in_memory();
        store.execute(|tx| tx.put(Table::Jobs, "a", &1u32)).unwrap();
        let interloper = store.clone();
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let mut attempts = 0;
        let value = store
            .execute_with_retry_async(&policy, "bump", |tx| {
                attempts += 1;
                let v: u32 = tx.get(Table::Jobs, "a")?.unwrap_or_default();
                if attempts == 1 {
                    interloper.execute(|other| other.put(Table::Jobs, "a", &10u32))?;
                }
                tx.put(Table::Jobs, "a", &(v + 1))?;
                Ok(v + 1)
            })
            .await
            .unwrap();
        assert_eq!(value, 11);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn savepoint_discards_later_writes() {
        let store = Store::in_memory();
        let mut tx = store.begin();
        tx.put(Table::Jobs, "kept", &1u32).unwrap();
        let savepoint = tx.savepoint();
        tx.put(Table::Jobs, "dropped", &2u32).unwrap();
        tx.delete(Table::Jobs, "kept");
        assert_eq!(tx.next_sequence("seq").unwrap(), 0);
        tx.rollback_to(savepoint);
        assert_eq!(tx.next_sequence("seq").unwrap(), 0);
        store.commit(tx).unwrap();
        assert_eq!(store.read(|tx| tx.get::<u32>(Table::Jobs, "kept")).unwrap(), Some(1));
        assert_eq!(store.read(|tx| tx.get::<u32>(Table::Jobs, "dropped")).unwrap(), None);
    }

    #[test]
    fn reopen_and_compact_preserve_state() {
        let backend = InMemoryBackend::new();
        let store = Store::open(Arc::new(backend.clone())).unwrap();
        for i in 0..5u32 {
            store.execute(|tx| tx.put(Table::Offsets, "c/t", &i)).unwrap();
        }
        store
            .execute(|tx| {
                tx.delete(Table::Offsets, "gone");
                tx.next_sequence("seq")
            })
            .unwrap();
        store.compact().unwrap();
        assert_eq!(backend.len(), 1);

        let reopened = Store::open(Arc::new(backend)).unwrap();
        assert_eq!(reopened.version(), store.version());
        assert_eq!(reopened.read(|tx| tx.get::<u32>(Table::Offsets, "c/t")).unwrap(), Some(4));
        assert_eq!(reopened.execute(|tx| tx.next_sequence("seq")).unwrap(), 1);
    }
}
