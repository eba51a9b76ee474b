//! Public types for the sync engine coordinator.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::keys::DataKey;
use crate::record::Record;
use crate::remote::RemoteError;
use crate::storage::StorageError;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, no identity resolved yet
    Created,
    /// Identity known, local API fully available
    Ready,
    /// A sync run is reconciling keys
    Syncing,
    /// Blocked on a merge-or-discard decision for anonymous data
    AwaitingMigration,
    /// Timers cancelled, engine is being torn down
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Ready => write!(f, "Ready"),
            Self::Syncing => write!(f, "Syncing"),
            Self::AwaitingMigration => write!(f, "AwaitingMigration"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("No identity resolver attached")]
    NoResolver,
    #[error("No identity established; call check_identity first")]
    NoIdentity,
    #[error("Anonymous data is waiting for a merge or discard decision")]
    MigrationPending,
    #[error("No migration is pending")]
    NoPendingMigration,
    #[error("Operation requires an authenticated identity")]
    NotAuthenticated,
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Options for a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Run even if another run is in flight (identity changes use this).
    pub force: bool,
}

impl SyncOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// What a sync run did with one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The backup copy was same-age or newer and replaced the local value
    AdoptedRemote,
    /// Both sides contributed; the result was stored and queued for push
    Merged,
    /// Local value was newer and already covered the backup copy
    KeptLocal,
    /// The backup had nothing for this key; the local value was queued
    Uploaded,
    /// Neither side had the key
    Empty,
    /// The key was not reconciled; the local value is untouched
    Skipped { reason: String },
}

impl KeyOutcome {
    /// Label for metrics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::AdoptedRemote => "adopted_remote",
            Self::Merged => "merged",
            Self::KeptLocal => "kept_local",
            Self::Uploaded => "uploaded",
            Self::Empty => "empty",
            Self::Skipped { .. } => "skipped",
        }
    }
}

impl std::fmt::Display for KeyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped { reason } => write!(f, "Skipped({})", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Snapshot handed back to the caller when a sync run completes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Identity the run reconciled for
    pub user_id: String,
    pub outcomes: BTreeMap<DataKey, KeyOutcome>,
    /// Reconciled records, one per key present after the run
    pub records: BTreeMap<DataKey, Record>,
    /// The run was dropped because another one was already in flight
    pub skipped_concurrent: bool,
    pub duration: Duration,
}

impl SyncReport {
    pub(super) fn coalesced(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            outcomes: BTreeMap::new(),
            records: BTreeMap::new(),
            skipped_concurrent: true,
            duration: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn outcome(&self, key: DataKey) -> Option<&KeyOutcome> {
        self.outcomes.get(&key)
    }

    #[must_use]
    pub fn value(&self, key: DataKey) -> Option<&Value> {
        self.records.get(&key).map(|r| &r.value)
    }

    /// Keys that were not reconciled.
    #[must_use]
    pub fn skipped_keys(&self) -> Vec<DataKey> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, KeyOutcome::Skipped { .. }))
            .map(|(k, _)| *k)
            .collect()
    }

    /// True when every key was reconciled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.skipped_concurrent && self.skipped_keys().is_empty()
    }

    /// Reconciled values as one `key -> value` object.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let map: Map<String, Value> = self
            .records
            .iter()
            .map(|(k, r)| (k.as_str().to_string(), r.value.clone()))
            .collect();
        Value::Object(map)
    }
}
