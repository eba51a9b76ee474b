// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote backup service clients.
//!
//! The backup service is a dumb last-write-wins store addressed by
//! `(user_id, key)`. All merge intelligence stays on the client.

pub mod memory;
pub mod http;
pub mod guarded;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::record::{BackupEnvelope, Timestamp};

pub use memory::InMemoryBackup;
pub use http::HttpBackupClient;
pub use guarded::GuardedBackup;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or transport failure
    #[error("Remote backup unreachable: {0}")]
    Unreachable(String),
    /// The service answered with a non-success status
    #[error("Remote backup rejected request ({status}): {reason}")]
    Rejected { status: u16, reason: String },
    /// A pull returned data that is not a valid envelope for the request
    #[error("Malformed envelope for '{key}': {reason}")]
    MalformedEnvelope { key: String, reason: String },
}

impl RemoteError {
    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Rejected { .. } => "rejected",
            Self::MalformedEnvelope { .. } => "malformed",
        }
    }
}

/// Administrative status of the backup medium.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupStatus {
    pub reachable: bool,
    pub writable: bool,
    pub users: u64,
    pub envelopes: u64,
}

#[async_trait]
pub trait RemoteBackup: Send + Sync {
    /// Store the full current value, overwriting whatever the service held.
    /// Returns the timestamp the service accepted.
    async fn push(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
        modified_at: Timestamp,
    ) -> Result<Timestamp, RemoteError>;

    /// `Ok(None)` when the service has no envelope for `(user_id, key)`.
    async fn pull(&self, user_id: &str, key: &str) -> Result<Option<BackupEnvelope>, RemoteError>;

    /// Remove every envelope for `user_id`. Returns how many were removed.
    async fn purge(&self, user_id: &str) -> Result<u64, RemoteError>;

    async fn status(&self) -> Result<BackupStatus, RemoteError>;
}

/// Check that a pulled envelope answers the request it was pulled for.
pub(crate) fn validate_envelope(
    env: BackupEnvelope,
    user_id: &str,
    key: &str,
) -> Result<BackupEnvelope, RemoteError> {
    if env.key != key {
        return Err(RemoteError::MalformedEnvelope {
            key: key.to_string(),
            reason: format!("envelope carries key '{}'", env.key),
        });
    }
    if env.user_id != user_id {
        return Err(RemoteError::MalformedEnvelope {
            key: key.to_string(),
            reason: "envelope belongs to another user".to_string(),
        });
    }
    if env.value.is_null() {
        return Err(RemoteError::MalformedEnvelope {
            key: key.to_string(),
            reason: "envelope value is null".to_string(),
        });
    }
    Ok(env)
}
