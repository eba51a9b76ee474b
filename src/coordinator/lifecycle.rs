//! Engine state transitions and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use super::{EngineState, SyncEngine};
use crate::identity::IdentityState;

/// Counts a sync run as in flight until dropped.
pub(super) struct RunGuard<'a> {
    runs: &'a AtomicUsize,
}

impl<'a> RunGuard<'a> {
    /// Claim the engine for a normal run; `None` if another run is in flight.
    pub(super) fn try_acquire(runs: &'a AtomicUsize) -> Option<Self> {
        runs.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { runs })
    }

    /// Register a forced run regardless of others in flight.
    pub(super) fn force(runs: &'a AtomicUsize) -> Self {
        runs.fetch_add(1, Ordering::AcqRel);
        Self { runs }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.runs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SyncEngine {
    pub(super) fn set_state(&self, state: EngineState) {
        if *self.state_rx.borrow() != state {
            info!(state = %state, "Engine state changed");
        }
        let _ = self.state.send(state);
    }

    pub(super) fn set_identity_state(&self, state: IdentityState) {
        *self.identity_state.write() = state;
        self.settle_state();
    }

    /// Derive the resting engine state from the identity state.
    pub(super) fn settle_state(&self) {
        if self.state() == EngineState::ShuttingDown {
            return;
        }
        if self.runs_in_flight.load(Ordering::Acquire) > 0 {
            self.set_state(EngineState::Syncing);
            return;
        }
        let state = match self.identity_state() {
            IdentityState::NoIdentity => EngineState::Created,
            IdentityState::MigrationPending => EngineState::AwaitingMigration,
            IdentityState::AnonymousActive | IdentityState::AuthenticatedActive => EngineState::Ready,
        };
        self.set_state(state);
    }

    /// True while at least one sync run is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.runs_in_flight.load(Ordering::Acquire) > 0
    }

    /// Cancel pending pushes and stop.
    ///
    /// Pending timers are dropped without firing; the local store already
    /// holds every write.
    #[tracing::instrument(skip(self))]
    pub fn shutdown(&self) {
        self.set_state(EngineState::ShuttingDown);
        let cancelled = self.scheduler.cancel_all();
        info!(cancelled, "Sync engine shut down");
    }
}
