//! File-backed commit log using JSON lines.
//!
//! Each committed transaction is one line. Compaction writes a snapshot to a temporary
//! file and renames it over the log.

use std::fs::{create_dir_all, rename, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::core::SchedulerError;
use crate::infra::store::{CommitEntry, StoreBackend};

/// JSONL commit log stored in a directory.
#[derive(Debug, Clone)]
pub struct JsonlBackend {
    path: PathBuf,
    stream: String,
}

impl JsonlBackend {
    /// Open (creating if needed) the log `<path>/<stream>.jsonl`.
    pub fn new(path: impl AsRef<Path>, stream: impl Into<String>) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        create_dir_all(&path).map_err(|e| SchedulerError::Storage(e.to_string()))?;
        Ok(Self {
            path,
            stream: stream.into(),
        })
    }

    fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.jsonl", self.stream))
    }
}

impl StoreBackend for JsonlBackend {
    fn load(&self) -> Result<Vec<CommitEntry>, SchedulerError> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new()
            .read(true)
            .open(&file_path)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;
        let mut entries = Vec::new();
        let mut torn = false;
        let mut lines = BufReader::new(file).lines().peekable();
        while let Some(line) = lines.next() {
            let line = line.map_err(|e| SchedulerError::Storage(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let is_last = lines.peek().is_none();
            match serde_json::from_str::<CommitEntry>(&line) {
                Ok(entry) => entries.push(entry),
                // A torn final line is an append that never completed.
                Err(e) if is_last => {
                    tracing::warn!("dropping incomplete trailing commit in {}: {}", file_path.display(), e);
                    torn = true;
                }
                Err(e) => return Err(SchedulerError::Storage(format!("corrupt commit log: {e}"))),
            }
        }
        if torn {
            self.rewrite(&entries)?;
        }
        Ok(entries)
    }

    fn append(&self, entry: &CommitEntry) -> Result<(), SchedulerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}").map_err(|e| SchedulerError::Storage(e.to_string()))?;
        file.flush().map_err(|e| SchedulerError::Storage(e.to_string()))
    }

    fn rewrite(&self, entries: &[CommitEntry]) -> Result<(), SchedulerError> {
        let tmp = self.path.join(format!("{}.jsonl.tmp", self.stream));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;
        for entry in entries {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}").map_err(|e| SchedulerError::Storage(e.to_string()))?;
        }
        file.sync_all().map_err(|e| SchedulerError::Storage(e.to_string()))?;
        rename(&tmp, self.file_path()).map_err(|e| SchedulerError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::store::{Mutation, Table};

    fn entry(version: u64) -> CommitEntry {
        CommitEntry {
            version,
            mutations: vec![Mutation {
                table: Table::Offsets,
                key: "k".into(),
                value: Some(serde_json::json!(version)),
            }],
        }
    }

    #[test]
    fn appends_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonlBackend::new(dir.path(), "store").unwrap();
        backend.append(&entry(1)).unwrap();
        backend.append(&entry(2)).unwrap();
        let reopened = JsonlBackend::new(dir.path(), "store").unwrap();
        assert_eq!(reopened.load().unwrap(), vec![entry(1), entry(2)]);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonlBackend::new(dir.path(), "store").unwrap();
        backend.append(&entry(1)).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("store.jsonl"))
            .unwrap();
        write!(file, "{{\"version\":2,\"muta").unwrap();
        assert_eq!(backend.load().unwrap(), vec![entry(1)]);
    }

    #[test]
    fn rewrite_replaces_log() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonlBackend::new(dir.path(), "store").unwrap();
        backend.append(&entry(1)).unwrap();
        backend.append(&entry(2)).unwrap();
        backend.rewrite(&[entry(2)]).unwrap();
        assert_eq!(backend.load().unwrap(), vec![entry(2)]);
    }
}
