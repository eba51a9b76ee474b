// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] is the caller-owned service instance that ties the
//! components together:
//! - Local store (every write stamped)
//! - Backup scheduler (debounced pushes)
//! - Merge engine (per-key conflict resolution)
//! - Identity & migration flows
//!
//! # Lifecycle
//!
//! ```text
//! Created → Ready ⇄ Syncing
//!             ⇅
//!     AwaitingMigration          (any) → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use backup_sync::{
//!     DataKey, EngineState, InMemoryBackup, MemoryLocalStore, StaticIdentity, SyncConfig,
//!     SyncEngine, SyncOptions,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::new(
//!     SyncConfig::default(),
//!     Arc::new(MemoryLocalStore::new()),
//!     Arc::new(InMemoryBackup::new()),
//! );
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.attach_resolver(Arc::new(StaticIdentity(Some("user-1".into()))));
//! engine.check_identity().await?;
//!
//! engine.set(DataKey::Theme, json!("dark"))?;
//! let report = engine.sync(SyncOptions::default()).await?;
//! println!("{:?}", report.outcomes);
//! # Ok(())
//! # }
//! ```

mod types;
mod api;
mod lifecycle;
mod sync;
mod identity_api;

pub use types::{EngineState, KeyOutcome, SyncError, SyncOptions, SyncReport};

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::identity::{Identity, IdentityResolver, IdentityState, PendingMigration};
use crate::merge::MergeEngine;
use crate::remote::RemoteBackup;
use crate::scheduler::BackupScheduler;
use crate::storage::LocalStore;

/// Local-first sync engine for one local store scope.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it behind an `Arc`. No lock is held
/// across an await point.
pub struct SyncEngine {
    pub(super) config: SyncConfig,

    pub(super) local: Arc<dyn LocalStore>,

    pub(super) remote: Arc<dyn RemoteBackup>,

    pub(super) scheduler: BackupScheduler,

    pub(super) merge: MergeEngine,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) identity_state: RwLock<IdentityState>,

    /// Identity that currently owns the local store
    pub(super) identity: RwLock<Identity>,

    pub(super) resolver: RwLock<Option<Arc<dyn IdentityResolver>>>,

    pub(super) pending_migration: Mutex<Option<PendingMigration>>,

    /// Sync runs in flight (forced runs included)
    pub(super) runs_in_flight: AtomicUsize,
}

impl SyncEngine {
    /// Create a new sync engine.
    ///
    /// The engine starts in `Created` state with no identity. Local reads
    /// and writes work immediately; pushes start once
    /// [`check_identity()`](Self::check_identity) has established who owns
    /// the store.
    pub fn new(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteBackup>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let scheduler = BackupScheduler::from_config(Arc::clone(&remote), &config);

        Self {
            config,
            local,
            remote,
            scheduler,
            merge: MergeEngine::with_defaults(),
            state: state_tx,
            state_rx,
            identity_state: RwLock::new(IdentityState::NoIdentity),
            identity: RwLock::new(Identity::Anonymous),
            resolver: RwLock::new(None),
            pending_migration: Mutex::new(None),
            runs_in_flight: AtomicUsize::new(0),
        }
    }

    /// Replace the merge strategy registry.
    #[must_use]
    pub fn with_merge_engine(mut self, merge: MergeEngine) -> Self {
        self.merge = merge;
        self
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn identity_state(&self) -> IdentityState {
        *self.identity_state.read()
    }

    /// Current identity, `None` until one has been established.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        match self.identity_state() {
            IdentityState::NoIdentity => None,
            _ => Some(self.identity.read().clone()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn scheduler(&self) -> &BackupScheduler {
        &self.scheduler
    }

    /// Wire id of the current identity when pushes may be scheduled.
    pub(super) fn active_user_id(&self) -> Option<String> {
        match self.identity_state() {
            IdentityState::AnonymousActive | IdentityState::AuthenticatedActive => Some(
                self.identity
                    .read()
                    .user_id(&self.config.anonymous_id)
                    .to_string(),
            ),
            IdentityState::NoIdentity | IdentityState::MigrationPending => None,
        }
    }
}
