// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Identity checks, anonymous-data migration, logout and account deletion.
//!
//! The local store records which identity owns it under a bookkeeping key.
//! Every identity check compares the resolver's answer with that record:
//!
//! | last owner    | resolved      | anonymous data | result                    |
//! |---------------|---------------|----------------|---------------------------|
//! | none          | any           | no             | `Established`             |
//! | same          | same          | -              | `Unchanged`               |
//! | anonymous     | authenticated | yes            | `MigrationPending`        |
//! | anonymous     | authenticated | no             | `Adopted`                 |
//! | anything else |               | -              | `Switched` (store reset)  |
//!
//! A store with data but no recorded owner predates identity tracking and
//! is treated as anonymous.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use crate::identity::{
    Identity, IdentityResolver, IdentityState, IdentityTransition, MigrationDecision,
    PendingMigration,
};
use crate::keys::{collection_has_data, DataKey, ANON_WARNING_ACK_KEY, OWNER_KEY};
use crate::metrics;
use crate::record::Record;

use super::sync::LocalInput;
use super::{SyncEngine, SyncError, SyncReport};

impl SyncEngine {
    /// Supply the host application's identity resolver.
    ///
    /// The engine stays in `NoIdentity` until this is called and
    /// [`check_identity()`](Self::check_identity) has run.
    pub fn attach_resolver(&self, resolver: Arc<dyn IdentityResolver>) {
        *self.resolver.write() = Some(resolver);
    }

    /// Resolve the current identity and apply any transition.
    ///
    /// Transitions into a new identity run a forced sync before returning,
    /// except `MigrationPending`, which waits for
    /// [`resolve_migration()`](Self::resolve_migration).
    #[tracing::instrument(skip(self))]
    pub async fn check_identity(&self) -> Result<IdentityTransition, SyncError> {
        let resolver = self.resolver.read().clone().ok_or(SyncError::NoResolver)?;
        let anonymous_id = self.config.anonymous_id.clone();
        let resolved = Identity::from_id(resolver.resolve().await.as_deref(), &anonymous_id);

        let pending_target = self.pending_migration.lock().as_ref().map(|p| p.to.clone());
        if let Some(to) = pending_target {
            if resolved == Identity::Authenticated(to.clone()) {
                return Ok(IdentityTransition::MigrationPending { to });
            }
            info!(to = %to, "Migration abandoned, identity changed again");
            *self.pending_migration.lock() = None;
            self.set_identity_state(IdentityState::AnonymousActive);
        }

        let transition = match (self.last_owner(), resolved) {
            (None, resolved) => {
                self.establish(resolved.clone())?;
                self.sync_for(&resolved).await?;
                IdentityTransition::Established(resolved)
            }
            (Some(last), resolved) if last == resolved => {
                if self.local.get(OWNER_KEY).is_none() {
                    self.record_owner(&resolved)?;
                }
                self.adopt_identity(resolved.clone());
                IdentityTransition::Unchanged(resolved)
            }
            (Some(Identity::Anonymous), Identity::Authenticated(to)) => {
                self.leave_anonymous(to).await?
            }
            (Some(from), to) => {
                self.switch(from.clone(), to.clone()).await?;
                IdentityTransition::Switched { from, to }
            }
        };

        info!(transition = transition.label(), "Identity checked");
        metrics::record_identity_transition(transition.label());
        Ok(transition)
    }

    /// Anonymous data waiting for a decision, if any.
    #[must_use]
    pub fn pending_migration(&self) -> Option<PendingMigration> {
        self.pending_migration.lock().clone()
    }

    /// Apply the caller's merge-or-discard decision.
    ///
    /// The engine leaves `MigrationPending` even when the backup cannot be
    /// reached; the backup catches up on later pushes.
    #[tracing::instrument(skip(self), fields(decision = decision.as_str()))]
    pub async fn resolve_migration(&self, decision: MigrationDecision) -> Result<SyncReport, SyncError> {
        let pending = self
            .pending_migration
            .lock()
            .take()
            .ok_or(SyncError::NoPendingMigration)?;
        let to = pending.to.clone();

        let input = match decision {
            MigrationDecision::Merge => LocalInput::Snapshot(pending.snapshot),
            MigrationDecision::Discard => {
                self.reset_local_store()?;
                LocalInput::Empty
            }
        };
        self.record_owner(&Identity::Authenticated(to.clone()))?;
        *self.identity.write() = Identity::Authenticated(to.clone());
        self.set_identity_state(IdentityState::AuthenticatedActive);

        let (report, uploads) = self.run_forced(&to, input).await?;

        let current: Vec<_> = uploads.iter().filter(|upload| self.is_current(upload)).collect();
        let pushes = join_all(current.iter().map(|upload| {
            self.scheduler
                .push_now(&to, upload.key.as_str(), &upload.value, upload.modified_at)
        }))
        .await;
        let failed_pushes = pushes.iter().filter(|r| r.is_err()).count();
        if failed_pushes > 0 {
            warn!(failed_pushes, "Migration pushes failed, backup will catch up on later edits");
        }

        self.purge_anonymous().await;

        let remote_ok = report.is_complete() && failed_pushes == 0;
        metrics::record_migration(decision.as_str(), remote_ok);
        info!(to = %to, decision = decision.as_str(), remote_ok, "Migration resolved");
        Ok(report)
    }

    /// Whether to show the one-time "anonymous data stays on this device"
    /// warning.
    #[must_use]
    pub fn anonymous_warning(&self) -> bool {
        self.identity_state() == IdentityState::AnonymousActive
            && self.has_collection_data()
            && self.local.get(ANON_WARNING_ACK_KEY) != Some(Value::Bool(true))
    }

    pub fn acknowledge_anonymous_warning(&self) -> Result<(), SyncError> {
        self.local.set(ANON_WARNING_ACK_KEY, Value::Bool(true))?;
        Ok(())
    }

    /// Drop pending pushes, clear the store and fall back to anonymous.
    #[tracing::instrument(skip(self))]
    pub fn logout(&self) -> Result<(), SyncError> {
        self.scheduler.cancel_all();
        *self.pending_migration.lock() = None;
        self.reset_local_store()?;
        self.establish(Identity::Anonymous)?;
        info!("Logged out");
        Ok(())
    }

    /// Purge the account's backup, then log out.
    ///
    /// Fails without touching the local store when the purge fails.
    #[tracing::instrument(skip(self))]
    pub async fn delete_account(&self) -> Result<u64, SyncError> {
        let user_id = match (self.identity_state(), self.identity.read().clone()) {
            (IdentityState::AuthenticatedActive, Identity::Authenticated(id)) => id,
            _ => return Err(SyncError::NotAuthenticated),
        };

        self.scheduler.cancel_all();
        let purged = self.remote.purge(&user_id).await?;
        self.logout()?;
        info!(user_id = %user_id, purged, "Account deleted");
        Ok(purged)
    }

    // --- internals ---

    fn last_owner(&self) -> Option<Identity> {
        match self.local.get(OWNER_KEY) {
            Some(Value::String(id)) => Some(Identity::from_id(Some(&id), &self.config.anonymous_id)),
            _ if self.has_collection_data() => Some(Identity::Anonymous),
            _ => None,
        }
    }

    fn has_collection_data(&self) -> bool {
        DataKey::collections().any(|key| {
            self.local
                .get(key.as_str())
                .is_some_and(|value| collection_has_data(&value))
        })
    }

    fn record_owner(&self, identity: &Identity) -> Result<(), SyncError> {
        let id = identity.user_id(&self.config.anonymous_id).to_string();
        self.local.set(OWNER_KEY, Value::String(id))?;
        Ok(())
    }

    fn adopt_identity(&self, identity: Identity) {
        let state = if identity.is_anonymous() {
            IdentityState::AnonymousActive
        } else {
            IdentityState::AuthenticatedActive
        };
        *self.identity.write() = identity;
        self.set_identity_state(state);
    }

    fn establish(&self, identity: Identity) -> Result<(), SyncError> {
        self.record_owner(&identity)?;
        self.adopt_identity(identity);
        Ok(())
    }

    async fn leave_anonymous(&self, to: String) -> Result<IdentityTransition, SyncError> {
        if self.has_collection_data() {
            let snapshot: Vec<Record> = DataKey::ALL
                .into_iter()
                .filter_map(|key| self.local.record(key.as_str()))
                .collect();
            self.scheduler.cancel_all();
            *self.pending_migration.lock() = Some(PendingMigration {
                from: self.config.anonymous_id.clone(),
                to: to.clone(),
                snapshot,
            });
            self.set_identity_state(IdentityState::MigrationPending);
            return Ok(IdentityTransition::MigrationPending { to });
        }

        let identity = Identity::Authenticated(to.clone());
        self.establish(identity.clone())?;
        self.sync_for(&identity).await?;
        Ok(IdentityTransition::Adopted { to })
    }

    /// Pushes still waiting out their window belong to `from` and are
    /// flushed under that identity before its data leaves the device.
    async fn switch(&self, from: Identity, to: Identity) -> Result<(), SyncError> {
        let flushed = self.scheduler.flush_all().await;
        info!(from = %from, to = %to, flushed, "Identity switched, resetting local store");
        self.reset_local_store()?;
        self.establish(to.clone())?;
        self.sync_for(&to).await
    }

    /// Forced sync after a transition, skipped for device-local anonymous data.
    async fn sync_for(&self, identity: &Identity) -> Result<(), SyncError> {
        if identity.is_anonymous() && !self.config.backup_anonymous {
            return Ok(());
        }
        let user_id = identity.user_id(&self.config.anonymous_id).to_string();
        let (_, uploads) = self.run_forced(&user_id, LocalInput::Store).await?;
        self.schedule_uploads(&user_id, uploads);
        Ok(())
    }

    /// Clear every record except the device-level warning acknowledgement.
    fn reset_local_store(&self) -> Result<(), SyncError> {
        let acknowledged = self.local.get(ANON_WARNING_ACK_KEY);
        self.local.clear()?;
        if let Some(ack) = acknowledged {
            self.local.set(ANON_WARNING_ACK_KEY, ack)?;
        }
        Ok(())
    }

    async fn purge_anonymous(&self) {
        let anonymous_id = &self.config.anonymous_id;
        match self.remote.purge(anonymous_id).await {
            Ok(purged) => info!(purged, "Anonymous backup purged"),
            Err(e) => warn!(error = %e, "Failed to purge anonymous backup"),
        }
    }
}
