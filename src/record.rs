// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record and envelope data structures.
//!
//! A [`Record`] is one stored key/value pair in the local store. A
//! [`BackupEnvelope`] is the same record addressed to a user, as exchanged
//! with the remote backup service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamps are epoch milliseconds throughout the crate.
pub type Timestamp = i64;

/// Current wall-clock time in epoch millis.
#[must_use]
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

/// One key/value pair with its modification time.
///
/// # Example
///
/// ```
/// use backup_sync::Record;
/// use serde_json::json;
///
/// let record = Record::new("tags", json!([{"name": "work"}]));
/// assert_eq!(record.key, "tags");
/// assert!(record.modified_at > 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub key: String,
    pub value: Value,
    pub modified_at: Timestamp,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self::with_timestamp(key, value, now_millis())
    }

    pub fn with_timestamp(key: impl Into<String>, value: Value, modified_at: Timestamp) -> Self {
        Self {
            key: key.into(),
            value,
            modified_at,
        }
    }

    /// Address this record to a user for the backup service.
    #[must_use]
    pub fn into_envelope(self, user_id: impl Into<String>) -> BackupEnvelope {
        BackupEnvelope {
            key: self.key,
            value: self.value,
            modified_at: self.modified_at,
            user_id: user_id.into(),
        }
    }

    /// Approximate payload size, used for metrics only.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.to_string().len()
    }
}

/// The unit exchanged with the remote backup service.
///
/// The service is last-write-wins on `(user_id, key)`. It never merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEnvelope {
    pub key: String,
    pub value: Value,
    pub modified_at: Timestamp,
    pub user_id: String,
}

impl BackupEnvelope {
    pub fn new(
        user_id: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        modified_at: Timestamp,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            modified_at,
            user_id: user_id.into(),
        }
    }

    /// Drop the addressing and keep the record.
    #[must_use]
    pub fn into_record(self) -> Record {
        Record {
            key: self.key,
            value: self.value,
            modified_at: self.modified_at,
        }
    }
}
