use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::traits::{reject_null, LocalStore, StorageError};
use crate::record::{now_millis, Record, Timestamp};

/// Non-persistent local store. One instance per scope, so tests and
/// multiple users in one process never share state.
pub struct MemoryLocalStore {
    data: DashMap<String, Record>,
}

impl MemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|r| r.value().value.clone())
    }

    fn modified_at(&self, key: &str) -> Option<Timestamp> {
        self.data.get(key).map(|r| r.value().modified_at)
    }

    fn record(&self, key: &str) -> Option<Record> {
        self.data.get(key).map(|r| r.value().clone())
    }

    fn set(&self, key: &str, value: Value) -> Result<Timestamp, StorageError> {
        reject_null(key, &value)?;
        let now = now_millis();
        self.data
            .insert(key.to_string(), Record::with_timestamp(key, value, now));
        Ok(now)
    }

    fn restore(&self, key: &str, value: Value, modified_at: Timestamp) -> Result<(), StorageError> {
        reject_null(key, &value)?;
        self.data
            .insert(key.to_string(), Record::with_timestamp(key, value, modified_at));
        Ok(())
    }

    fn restore_if(
        &self,
        key: &str,
        expected: Option<Timestamp>,
        value: Value,
        modified_at: Timestamp,
    ) -> Result<bool, StorageError> {
        reject_null(key, &value)?;
        let record = Record::with_timestamp(key, value, modified_at);
        // The entry holds the shard lock across the compare and the write.
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if Some(entry.get().modified_at) != expected {
                    return Ok(false);
                }
                entry.insert(record);
            }
            Entry::Vacant(entry) => {
                if expected.is_some() {
                    return Ok(false);
                }
                entry.insert(record);
            }
        }
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.data.clear();
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.data.iter().map(|r| r.key().clone()).collect()
    }
}
