// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local store persisted as one JSON document.
//!
//! Every mutation rewrites the document through a temp file and a rename,
//! so a crash mid-write leaves the previous document intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use super::traits::{reject_null, LocalStore, StorageError};
use crate::record::{now_millis, Record, Timestamp};

pub struct FileLocalStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, Record>>,
}

impl FileLocalStore {
    /// Open (or create) the store at `path`.
    ///
    /// A document that exists but cannot be parsed is an error; the store
    /// never silently resets user data.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let records: Vec<Record> = serde_json::from_str(&raw)?;
            records.into_iter().map(|r| (r.key.clone(), r)).collect()
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), records = data.len(), "Local store opened");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, Record>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let records: Vec<&Record> = data.values().collect();
        let bytes = serde_json::to_vec(&records)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Local store persisted");
        Ok(())
    }

    /// Apply a mutation and persist it; memory is left untouched if the
    /// write to disk fails.
    fn mutate<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, Record>),
    {
        self.mutate_if(|data| {
            f(data);
            true
        })
        .map(|_| ())
    }

    /// Like `mutate`, but `f` may decline by returning `false`, in which
    /// case nothing is persisted.
    fn mutate_if<F>(&self, f: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, Record>) -> bool,
    {
        let mut guard = self.data.write();
        let mut next = guard.clone();
        if !f(&mut next) {
            return Ok(false);
        }
        self.persist(&next)?;
        *guard = next;
        Ok(true)
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).map(|r| r.value.clone())
    }

    fn modified_at(&self, key: &str) -> Option<Timestamp> {
        self.data.read().get(key).map(|r| r.modified_at)
    }

    fn record(&self, key: &str) -> Option<Record> {
        self.data.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<Timestamp, StorageError> {
        reject_null(key, &value)?;
        let now = now_millis();
        self.mutate(|data| {
            data.insert(key.to_string(), Record::with_timestamp(key, value, now));
        })?;
        Ok(now)
    }

    fn restore(&self, key: &str, value: Value, modified_at: Timestamp) -> Result<(), StorageError> {
        reject_null(key, &value)?;
        self.mutate(|data| {
            data.insert(key.to_string(), Record::with_timestamp(key, value, modified_at));
        })
    }

    fn restore_if(
        &self,
        key: &str,
        expected: Option<Timestamp>,
        value: Value,
        modified_at: Timestamp,
    ) -> Result<bool, StorageError> {
        reject_null(key, &value)?;
        self.mutate_if(|data| {
            if data.get(key).map(|r| r.modified_at) != expected {
                return false;
            }
            data.insert(key.to_string(), Record::with_timestamp(key, value, modified_at));
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if !self.data.read().contains_key(key) {
            return Ok(());
        }
        self.mutate(|data| {
            data.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.mutate(BTreeMap::clear)
    }

    fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}
