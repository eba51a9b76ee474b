// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Identity model and migration types.
//!
//! # State machine
//!
//! ```text
//!                  attach_resolver + check_identity
//!   NoIdentity ──────────────────────────────────────┐
//!                                                    ▼
//!        ┌──────────────── AnonymousActive ◄──── logout / switch to anon
//!        │ sign-in, anonymous       │ sign-in, anonymous
//!        │ collections non-empty    │ store empty
//!        ▼                          ▼
//!   MigrationPending ──merge/discard──► AuthenticatedActive ◄── switch A → B
//! ```

use async_trait::async_trait;

use crate::record::Record;

/// Who owns the local store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The shared sentinel used by every unauthenticated session.
    Anonymous,
    Authenticated(String),
}

impl Identity {
    /// Map a recorded or resolved id onto an identity, treating the
    /// configured sentinel as anonymous.
    #[must_use]
    pub fn from_id(id: Option<&str>, anonymous_id: &str) -> Self {
        match id {
            Some(id) if id != anonymous_id && !id.is_empty() => Self::Authenticated(id.to_string()),
            _ => Self::Anonymous,
        }
    }

    /// The id used on the wire and in bookkeeping.
    #[must_use]
    pub fn user_id<'a>(&'a self, anonymous_id: &'a str) -> &'a str {
        match self {
            Self::Anonymous => anonymous_id,
            Self::Authenticated(id) => id,
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::Authenticated(id) => write!(f, "Authenticated({})", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// No resolver attached yet
    NoIdentity,
    AnonymousActive,
    AuthenticatedActive,
    /// Waiting for the caller to merge or discard anonymous data
    MigrationPending,
}

impl std::fmt::Display for IdentityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoIdentity => write!(f, "NoIdentity"),
            Self::AnonymousActive => write!(f, "AnonymousActive"),
            Self::AuthenticatedActive => write!(f, "AuthenticatedActive"),
            Self::MigrationPending => write!(f, "MigrationPending"),
        }
    }
}

/// Supplied by the host application; answers "who is signed in right now".
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `None` when nobody is signed in.
    async fn resolve(&self) -> Option<String>;
}

/// Resolver returning a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<String>);

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Anonymous data waiting for a merge-or-discard decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMigration {
    /// Always the anonymous sentinel
    pub from: String,
    pub to: String,
    /// Anonymous data records at the moment the switch was detected
    pub snapshot: Vec<Record>,
}

impl PendingMigration {
    /// Number of entries across the snapshot's collections.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.snapshot
            .iter()
            .map(|r| match &r.value {
                serde_json::Value::Array(items) => items.len(),
                serde_json::Value::Object(days) => days
                    .values()
                    .filter_map(serde_json::Value::as_array)
                    .map(Vec::len)
                    .sum(),
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDecision {
    /// Fold anonymous data into the account
    Merge,
    /// Drop anonymous data and take the account as stored remotely
    Discard,
}

impl MigrationDecision {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Discard => "discard",
        }
    }
}

/// What an identity check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityTransition {
    /// Same identity as last recorded
    Unchanged(Identity),
    /// First identity recorded for this store
    Established(Identity),
    /// Anonymous to authenticated with nothing to migrate
    Adopted { to: String },
    /// Anonymous to authenticated with data; the caller must decide
    MigrationPending { to: String },
    /// Any other switch; the store was reset for the new identity
    Switched { from: Identity, to: Identity },
}

impl IdentityTransition {
    /// Label for metrics and logs
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged(_) => "unchanged",
            Self::Established(_) => "established",
            Self::Adopted { .. } => "adopted",
            Self::MigrationPending { .. } => "migration_pending",
            Self::Switched { .. } => "switched",
        }
    }
}
