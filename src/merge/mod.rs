// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict resolution between a local value and its backup copy.
//!
//! # Decision procedure
//!
//! ```text
//!   local absent            ─► adopt remote
//!   remote absent           ─► keep local
//!   both absent             ─► empty value for the key's shape
//!   local newer than remote ─► strategy.merge(local, remote)
//!   otherwise               ─► adopt remote
//! ```
//!
//! The "otherwise" branch is what lets deletions made on another device
//! propagate: an item missing from the remote copy has no timestamp of its
//! own, so a same-age or newer remote copy is taken as is.
//!
//! Per-key behavior lives in a [`MergeStrategy`] registered on the
//! [`MergeEngine`]. Adding a new collection type is one `register` call.

pub mod collections;
pub mod scalar;
pub mod tasks;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::keys::{DataKey, KeyKind};
use crate::record::Timestamp;

pub use collections::KeyedList;
pub use scalar::RemoteWins;
pub use tasks::DailyTasks;

/// Type-specific merge for a value whose local copy is newer than the
/// remote copy.
///
/// Implementations must be pure: the same inputs always give the same
/// output.
pub trait MergeStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn merge(&self, local: &Value, remote: &Value) -> Value;

    /// Value used when neither side has the key.
    fn empty(&self) -> Value;
}

/// How a value was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The remote value is taken verbatim.
    AdoptRemote,
    /// The local value is kept verbatim.
    KeepLocal,
    /// The result differs from both inputs.
    Merged,
    /// Neither side had the key.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub resolution: Resolution,
}

/// One side of a conflict: the value and when it was last written.
pub type Side<'a> = Option<(&'a Value, Timestamp)>;

/// Registry mapping each data key to its merge strategy.
pub struct MergeEngine {
    strategies: HashMap<DataKey, Arc<dyn MergeStrategy>>,
    fallback: Arc<dyn MergeStrategy>,
}

impl MergeEngine {
    /// Engine with no registrations; every key resolves as a scalar.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: Arc::new(RemoteWins),
        }
    }

    /// Engine with the built-in strategy for every [`DataKey`].
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut engine = Self::new();
        for key in DataKey::ALL {
            match key {
                DataKey::DailyTasks => engine.register(key, DailyTasks),
                DataKey::Tags => engine.register(key, KeyedList::tags()),
                DataKey::Habits => engine.register(key, KeyedList::habits()),
                DataKey::YearlyGoals | DataKey::QuarterlyGoals | DataKey::WeeklyGoals => {
                    engine.register(key, KeyedList::goals())
                }
                DataKey::Theme | DataKey::DarkMode => engine.register(key, RemoteWins),
            };
        }
        engine
    }

    pub fn register(&mut self, key: DataKey, strategy: impl MergeStrategy + 'static) -> &mut Self {
        self.strategies.insert(key, Arc::new(strategy));
        self
    }

    #[must_use]
    pub fn strategy(&self, key: DataKey) -> &dyn MergeStrategy {
        self.strategies
            .get(&key)
            .map(|s| s.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    /// Decide the value for `key` given both sides.
    #[must_use]
    pub fn resolve(&self, key: DataKey, local: Side<'_>, remote: Side<'_>) -> Resolved {
        let strategy = self.strategy(key);
        match (local, remote) {
            (None, None) => Resolved {
                value: strategy.empty(),
                resolution: Resolution::Empty,
            },
            (None, Some((remote, _))) => adopt(remote),
            (Some((local, _)), None) => keep(local),
            (Some((local, local_at)), Some((remote, remote_at))) => {
                if local_at <= remote_at {
                    return adopt(remote);
                }
                let merged = strategy.merge(local, remote);
                if &merged == remote {
                    adopt(remote)
                } else if &merged == local {
                    keep(local)
                } else {
                    Resolved {
                        value: merged,
                        resolution: Resolution::Merged,
                    }
                }
            }
        }
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn adopt(remote: &Value) -> Resolved {
    Resolved {
        value: remote.clone(),
        resolution: Resolution::AdoptRemote,
    }
}

fn keep(local: &Value) -> Resolved {
    Resolved {
        value: local.clone(),
        resolution: Resolution::KeepLocal,
    }
}

/// Empty value for a key's shape; `Null` for scalars.
#[must_use]
pub fn empty_value(kind: KeyKind) -> Value {
    match kind {
        KeyKind::DatePartitioned => Value::Object(serde_json::Map::new()),
        KeyKind::List => Value::Array(Vec::new()),
        KeyKind::Scalar => Value::Null,
    }
}
