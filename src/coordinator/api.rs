//! Local key/value API, bulk export/import and the status probe.
//!
//! Reads and writes go straight to the local store and never wait on the
//! network. A successful write arms the backup timer for its key.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::identity::IdentityState;
use crate::keys::{DataKey, INTERNAL_PREFIX};
use crate::merge::empty_value;
use crate::record::{Record, Timestamp};
use crate::remote::{BackupStatus, RemoteError};

use super::{SyncEngine, SyncError};

impl SyncEngine {
    #[must_use]
    pub fn get(&self, key: DataKey) -> Option<Value> {
        self.local.get(key.as_str())
    }

    #[must_use]
    pub fn record(&self, key: DataKey) -> Option<Record> {
        self.local.record(key.as_str())
    }

    #[must_use]
    pub fn modified_at(&self, key: DataKey) -> Option<Timestamp> {
        self.local.modified_at(key.as_str())
    }

    /// Write a value locally and schedule its backup.
    ///
    /// Rejected while a migration decision is pending: the anonymous
    /// snapshot shown to the user must stay what gets merged.
    #[tracing::instrument(skip(self, value), fields(key = %key))]
    pub fn set(&self, key: DataKey, value: Value) -> Result<Timestamp, SyncError> {
        if self.identity_state() == IdentityState::MigrationPending {
            return Err(SyncError::MigrationPending);
        }
        let modified_at = self.local.set(key.as_str(), value.clone())?;
        crate::metrics::record_local_write(key.as_str());

        match self.active_user_id() {
            Some(user_id) => {
                self.scheduler.schedule(&user_id, key.as_str(), value, modified_at);
            }
            None => debug!("No identity yet, write kept local"),
        }
        Ok(modified_at)
    }

    /// Remove a key locally.
    ///
    /// Collections are backed up as empty so the deletion reaches other
    /// devices; a removed preference simply stops being pushed.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub fn remove(&self, key: DataKey) -> Result<(), SyncError> {
        if self.identity_state() == IdentityState::MigrationPending {
            return Err(SyncError::MigrationPending);
        }
        self.local.remove(key.as_str())?;

        match (self.active_user_id(), key.is_collection()) {
            (Some(user_id), true) => {
                self.scheduler.schedule(
                    &user_id,
                    key.as_str(),
                    empty_value(key.kind()),
                    crate::record::now_millis(),
                );
            }
            _ => {
                self.scheduler.cancel(key.as_str());
            }
        }
        Ok(())
    }

    /// Every present data key as one `key -> value` object.
    ///
    /// Bookkeeping keys are not included.
    #[must_use]
    pub fn export_snapshot(&self) -> Value {
        let map: Map<String, Value> = DataKey::ALL
            .into_iter()
            .filter_map(|key| self.get(key).map(|v| (key.as_str().to_string(), v)))
            .collect();
        Value::Object(map)
    }

    /// Load an exported document through [`set`](Self::set).
    ///
    /// Unknown keys, bookkeeping keys and `null` values are skipped with a
    /// warning. Returns the number of keys written.
    #[tracing::instrument(skip(self, snapshot))]
    pub fn import_snapshot(&self, snapshot: Value) -> Result<usize, SyncError> {
        let Value::Object(entries) = snapshot else {
            return Err(SyncError::InvalidSnapshot(
                "expected an object of key -> value".to_string(),
            ));
        };

        let mut imported = 0;
        for (name, value) in entries {
            if name.starts_with(INTERNAL_PREFIX) {
                warn!(key = %name, "Skipping bookkeeping key in snapshot");
                continue;
            }
            let Some(key) = DataKey::parse(&name) else {
                warn!(key = %name, "Skipping unknown key in snapshot");
                continue;
            };
            if value.is_null() {
                warn!(key = %name, "Skipping null value in snapshot");
                continue;
            }
            self.set(key, value)?;
            imported += 1;
        }
        debug!(imported, "Snapshot imported");
        Ok(imported)
    }

    /// Ask the backup service whether it is reachable and writable.
    ///
    /// For administrative surfaces; the engine never depends on it.
    pub async fn status(&self) -> Result<BackupStatus, RemoteError> {
        self.remote.status().await
    }

    /// Keys with a backup push waiting for its quiet window.
    #[must_use]
    pub fn pending_pushes(&self) -> Vec<String> {
        self.scheduler.pending_keys()
    }
}
