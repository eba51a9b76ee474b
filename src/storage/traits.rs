use serde_json::Value;
use thiserror::Error;

use crate::record::{Record, Timestamp};

#[derive(Error, Debug)]
pub enum StorageError {
    /// `null` was handed to `set`. Empty arrays, empty objects and `false`
    /// are valid values.
    #[error("Local write rejected for '{key}': value is null")]
    LocalWriteRejected { key: String },
    #[error("Local store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Local store document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Single-writer key/value table scoped to one device profile.
///
/// Writes are synchronous from the caller's point of view and every write
/// replaces `value` and `modified_at` together. No merging happens here.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn modified_at(&self, key: &str) -> Option<Timestamp>;

    /// Value and timestamp read together.
    fn record(&self, key: &str) -> Option<Record>;

    /// Persist `value`, stamping the current time.
    fn set(&self, key: &str, value: Value) -> Result<Timestamp, StorageError>;

    /// Persist `value` with an explicit timestamp (reconciliation writes).
    fn restore(&self, key: &str, value: Value, modified_at: Timestamp) -> Result<(), StorageError>;

    /// `restore`, applied only while the key's current timestamp equals
    /// `expected` (`None`: the key must be absent). Returns `false` and
    /// writes nothing when the record has moved on.
    fn restore_if(
        &self,
        key: &str,
        expected: Option<Timestamp>,
        value: Value,
        modified_at: Timestamp,
    ) -> Result<bool, StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every record, bookkeeping keys included.
    fn clear(&self) -> Result<(), StorageError>;

    fn keys(&self) -> Vec<String>;
}

pub(crate) fn reject_null(key: &str, value: &Value) -> Result<(), StorageError> {
    if value.is_null() {
        return Err(StorageError::LocalWriteRejected { key: key.to_string() });
    }
    Ok(())
}
