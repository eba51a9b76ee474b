use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::{validate_envelope, BackupStatus, RemoteBackup, RemoteError};
use crate::record::{BackupEnvelope, Timestamp};

/// A pushed envelope as observed by [`InMemoryBackup`].
#[derive(Debug, Clone, PartialEq)]
pub struct PushLogEntry {
    pub user_id: String,
    pub key: String,
    pub value: Value,
    pub modified_at: Timestamp,
}

/// In-process backup service.
///
/// Useful for tests and for embedding the engine without a network. Faults
/// can be injected with [`set_reachable`](Self::set_reachable) and
/// [`set_writable`](Self::set_writable).
pub struct InMemoryBackup {
    data: DashMap<(String, String), BackupEnvelope>,
    reachable: AtomicBool,
    writable: AtomicBool,
    pushes: Mutex<Vec<PushLogEntry>>,
    pulls: AtomicU64,
}

impl InMemoryBackup {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            reachable: AtomicBool::new(true),
            writable: AtomicBool::new(true),
            pushes: Mutex::new(Vec::new()),
            pulls: AtomicU64::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// When not writable, pushes and purges answer 503.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Store an envelope directly, bypassing validation (test seeding).
    pub fn seed(&self, user_id: &str, key: &str, envelope: BackupEnvelope) {
        self.data
            .insert((user_id.to_string(), key.to_string()), envelope);
    }

    /// Current stored envelope, without counting as a pull.
    #[must_use]
    pub fn envelope(&self, user_id: &str, key: &str) -> Option<BackupEnvelope> {
        self.data
            .get(&(user_id.to_string(), key.to_string()))
            .map(|r| r.value().clone())
    }

    /// Every accepted push, oldest first.
    #[must_use]
    pub fn push_log(&self) -> Vec<PushLogEntry> {
        self.pushes.lock().clone()
    }

    #[must_use]
    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    #[must_use]
    pub fn pull_count(&self) -> u64 {
        self.pulls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unreachable("connection refused".to_string()))
        }
    }

    fn ensure_writable(&self) -> Result<(), RemoteError> {
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Rejected {
                status: 503,
                reason: "backup medium is read-only".to_string(),
            })
        }
    }
}

impl Default for InMemoryBackup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackup for InMemoryBackup {
    async fn push(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
        modified_at: Timestamp,
    ) -> Result<Timestamp, RemoteError> {
        self.ensure_reachable()?;
        self.ensure_writable()?;
        let envelope = BackupEnvelope::new(user_id, key, value.clone(), modified_at);
        self.data
            .insert((user_id.to_string(), key.to_string()), envelope);
        self.pushes.lock().push(PushLogEntry {
            user_id: user_id.to_string(),
            key: key.to_string(),
            value: value.clone(),
            modified_at,
        });
        Ok(modified_at)
    }

    async fn pull(&self, user_id: &str, key: &str) -> Result<Option<BackupEnvelope>, RemoteError> {
        self.ensure_reachable()?;
        self.pulls.fetch_add(1, Ordering::SeqCst);
        match self.envelope(user_id, key) {
            Some(env) => validate_envelope(env, user_id, key).map(Some),
            None => Ok(None),
        }
    }

    async fn purge(&self, user_id: &str) -> Result<u64, RemoteError> {
        self.ensure_reachable()?;
        self.ensure_writable()?;
        let before = self.data.len();
        self.data.retain(|(user, _), _| user != user_id);
        Ok((before - self.data.len()) as u64)
    }

    async fn status(&self) -> Result<BackupStatus, RemoteError> {
        self.ensure_reachable()?;
        let mut users: Vec<String> = self.data.iter().map(|r| r.key().0.clone()).collect();
        users.sort();
        users.dedup();
        Ok(BackupStatus {
            reachable: true,
            writable: self.writable.load(Ordering::SeqCst),
            users: users.len() as u64,
            envelopes: self.data.len() as u64,
        })
    }
}
