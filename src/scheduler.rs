// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Debounced backup pushes.
//!
//! Every key owns at most one live timer. Scheduling a key that already has
//! a timer aborts the old one and arms a fresh one, so a burst of writes
//! produces a single push carrying the last value once the key has been
//! quiet for the full window.
//!
//! ```text
//! schedule(k, v1) ──┐
//! schedule(k, v2) ──┼── abort + re-arm ──► (quiet for window) ──► push(k, v3)
//! schedule(k, v3) ──┘
//! ```
//!
//! Timers live in an arena keyed by key name. Each entry carries a
//! generation number; a timer that wakes up only removes its own entry, so a
//! timer that lost a race with a newer `schedule` exits without pushing.
//! Entries also keep their payload, so [`BackupScheduler::flush_all`] can
//! push them early under the identity captured at schedule time.
//!
//! Push failures are logged and dropped. The value is pushed again on the
//! next edit of the key or the next sync run that finds it newer than the
//! backup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::metrics;
use crate::record::Timestamp;
use crate::remote::{RemoteBackup, RemoteError};

struct PendingPush {
    generation: u64,
    handle: JoinHandle<()>,
    user_id: String,
    value: Value,
    modified_at: Timestamp,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingPush>>>;

pub struct BackupScheduler {
    remote: Arc<dyn RemoteBackup>,
    quiescence: Duration,
    anonymous_id: String,
    backup_anonymous: bool,
    pending: PendingMap,
    generation: AtomicU64,
}

impl BackupScheduler {
    /// Scheduler with the default anonymous policy (anonymous data is not
    /// pushed).
    pub fn new(remote: Arc<dyn RemoteBackup>, quiescence: Duration) -> Self {
        let defaults = SyncConfig::default();
        Self::build(remote, quiescence, defaults.anonymous_id, defaults.backup_anonymous)
    }

    pub fn from_config(remote: Arc<dyn RemoteBackup>, config: &SyncConfig) -> Self {
        Self::build(
            remote,
            Duration::from_millis(config.quiescence_ms),
            config.anonymous_id.clone(),
            config.backup_anonymous,
        )
    }

    fn build(
        remote: Arc<dyn RemoteBackup>,
        quiescence: Duration,
        anonymous_id: String,
        backup_anonymous: bool,
    ) -> Self {
        Self {
            remote,
            quiescence,
            anonymous_id,
            backup_anonymous,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn quiescence(&self) -> Duration {
        self.quiescence
    }

    /// Arm (or re-arm) the push timer for `key`.
    ///
    /// `user_id` is captured now: a push that fires after an identity change
    /// still lands under the identity that made the edit. Returns `false`
    /// when nothing was armed because the data belongs to the anonymous
    /// identity and anonymous backup is off.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, user_id: &str, key: &str, value: Value, modified_at: Timestamp) -> bool {
        if user_id == self.anonymous_id && !self.backup_anonymous {
            debug!(key, "Anonymous data is device-local, push not scheduled");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let remote = Arc::clone(&self.remote);
        let pending = Arc::clone(&self.pending);
        let quiescence = self.quiescence;
        let user = user_id.to_string();
        let owned_key = key.to_string();
        let entry_value = value.clone();

        // Lock before spawning so the timer cannot look for its entry
        // before it is inserted.
        let mut map = self.pending.lock();
        let handle = tokio::spawn(async move {
            sleep(quiescence).await;
            {
                let mut map = pending.lock();
                if map.get(&owned_key).map(|entry| entry.generation) != Some(generation) {
                    return;
                }
                map.remove(&owned_key);
                metrics::set_pending_pushes(map.len());
            }
            // Failure is already logged and counted.
            let _ = push(remote.as_ref(), &user, &owned_key, &value, modified_at).await;
        });

        let entry = PendingPush {
            generation,
            handle,
            user_id: user_id.to_string(),
            value: entry_value,
            modified_at,
        };
        let coalesced = match map.insert(key.to_string(), entry) {
            Some(previous) => {
                previous.handle.abort();
                true
            }
            None => false,
        };
        metrics::record_schedule(key, coalesced);
        metrics::set_pending_pushes(map.len());
        debug!(key, generation, coalesced, "Backup push scheduled");
        true
    }

    /// Push immediately, dropping any pending timer for the key.
    ///
    /// Used where the caller needs the outcome (migration resolution).
    /// Ignores the anonymous policy.
    pub async fn push_now(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
        modified_at: Timestamp,
    ) -> Result<Timestamp, RemoteError> {
        self.cancel(key);
        push(self.remote.as_ref(), user_id, key, value, modified_at).await
    }

    /// Drop the pending timer for `key` without pushing.
    pub fn cancel(&self, key: &str) -> bool {
        let mut map = self.pending.lock();
        let removed = map.remove(key);
        metrics::set_pending_pushes(map.len());
        match removed {
            Some(entry) => {
                entry.handle.abort();
                metrics::record_cancelled(1);
                true
            }
            None => false,
        }
    }

    /// Drop the pending push for `key` unless it carries a value newer than
    /// `modified_at`.
    ///
    /// Called when a reconciled value stamped `modified_at` replaces the
    /// local one: an older pending value must not reach the backup after it.
    pub fn cancel_superseded(&self, key: &str, modified_at: Timestamp) -> bool {
        let mut map = self.pending.lock();
        if !map.get(key).is_some_and(|entry| entry.modified_at <= modified_at) {
            return false;
        }
        let removed = map.remove(key);
        metrics::set_pending_pushes(map.len());
        if let Some(entry) = removed {
            entry.handle.abort();
            metrics::record_cancelled(1);
            debug!(key, modified_at, "Pending push superseded by reconciled value");
        }
        true
    }

    /// Push every pending value now, each under the identity it was
    /// scheduled for, instead of waiting out the window.
    ///
    /// Returns how many pushes were accepted. Failures are logged and
    /// dropped like timer-driven pushes.
    pub async fn flush_all(&self) -> usize {
        let drained: Vec<(String, PendingPush)> = {
            let mut map = self.pending.lock();
            let drained = map.drain().collect();
            metrics::set_pending_pushes(0);
            drained
        };
        if drained.is_empty() {
            return 0;
        }
        for (_, entry) in &drained {
            entry.handle.abort();
        }

        let results = join_all(drained.iter().map(|(key, entry)| {
            push(self.remote.as_ref(), &entry.user_id, key, &entry.value, entry.modified_at)
        }))
        .await;
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        debug!(pending = drained.len(), accepted, "Flushed pending backup pushes");
        accepted
    }

    /// Drop every pending timer without pushing. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingPush> = {
            let mut map = self.pending.lock();
            let drained = map.drain().map(|(_, entry)| entry).collect();
            metrics::set_pending_pushes(0);
            drained
        };
        for entry in &drained {
            entry.handle.abort();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "Cancelled pending backup pushes");
            metrics::record_cancelled(drained.len());
        }
        drained.len()
    }

    /// Keys with a live timer, sorted.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pending.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().contains_key(key)
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        for (_, entry) in self.pending.lock().drain() {
            entry.handle.abort();
        }
    }
}

async fn push(
    remote: &dyn RemoteBackup,
    user_id: &str,
    key: &str,
    value: &Value,
    modified_at: Timestamp,
) -> Result<Timestamp, RemoteError> {
    match remote.push(user_id, key, value, modified_at).await {
        Ok(accepted) => {
            debug!(key, user_id, accepted, "Backup push accepted");
            metrics::record_push(key, "success");
            metrics::record_bytes_pushed(serde_json::to_vec(value).map(|b| b.len()).unwrap_or(0));
            Ok(accepted)
        }
        Err(e) => {
            warn!(key, user_id, error = %e, "Backup push failed, local copy kept");
            metrics::record_push(key, e.kind());
            Err(e)
        }
    }
}
