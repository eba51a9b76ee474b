// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The fixed set of synchronized keys.

use serde_json::Value;

/// Prefix reserved for engine bookkeeping inside the local store.
pub const INTERNAL_PREFIX: &str = "__sync.";

/// Local store key holding the last identity that owned the store.
pub const OWNER_KEY: &str = "__sync.userId";

/// Local store key set once the anonymous-data warning is dismissed.
pub const ANON_WARNING_ACK_KEY: &str = "__sync.anonWarningAck";

/// Shape of the value stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Object of `date -> [task]`
    DatePartitioned,
    /// Array of items with an identity
    List,
    /// A single preference value
    Scalar,
}

/// A synchronized data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKey {
    DailyTasks,
    Tags,
    Habits,
    YearlyGoals,
    QuarterlyGoals,
    WeeklyGoals,
    Theme,
    DarkMode,
}

impl DataKey {
    pub const ALL: [DataKey; 8] = [
        DataKey::DailyTasks,
        DataKey::Tags,
        DataKey::Habits,
        DataKey::YearlyGoals,
        DataKey::QuarterlyGoals,
        DataKey::WeeklyGoals,
        DataKey::Theme,
        DataKey::DarkMode,
    ];

    /// Storage and wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyTasks => "dailyTasks",
            Self::Tags => "tags",
            Self::Habits => "habits",
            Self::YearlyGoals => "yearlyGoals",
            Self::QuarterlyGoals => "quarterlyGoals",
            Self::WeeklyGoals => "weeklyGoals",
            Self::Theme => "theme",
            Self::DarkMode => "darkMode",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    #[must_use]
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::DailyTasks => KeyKind::DatePartitioned,
            Self::Tags
            | Self::Habits
            | Self::YearlyGoals
            | Self::QuarterlyGoals
            | Self::WeeklyGoals => KeyKind::List,
            Self::Theme | Self::DarkMode => KeyKind::Scalar,
        }
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        !matches!(self.kind(), KeyKind::Scalar)
    }

    /// Keys holding user collections (everything except preferences).
    pub fn collections() -> impl Iterator<Item = DataKey> {
        Self::ALL.into_iter().filter(DataKey::is_collection)
    }
}

impl std::fmt::Display for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when a collection value holds at least one entry.
///
/// Scalars and malformed values count as empty.
#[must_use]
pub fn collection_has_data(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty(),
        Value::Object(partitions) => partitions.values().any(|v| match v {
            Value::Array(items) => !items.is_empty(),
            _ => false,
        }),
        _ => false,
    }
}
