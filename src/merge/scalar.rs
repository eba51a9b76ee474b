//! Scalar preferences (theme, dark-mode flag).

use serde_json::Value;

use super::MergeStrategy;

/// A single value has no meaningful merge; the backup copy wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl MergeStrategy for RemoteWins {
    fn name(&self) -> &'static str {
        "remote_wins"
    }

    fn merge(&self, _local: &Value, remote: &Value) -> Value {
        remote.clone()
    }

    fn empty(&self) -> Value {
        Value::Null
    }
}
