//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use backup_sync::SyncConfig;
//!
//! // Local-only (no remote backup configured)
//! let config = SyncConfig::default();
//! assert_eq!(config.quiescence_ms, 1500);
//! assert_eq!(config.anonymous_id, "anonymous");
//!
//! // With a backup service
//! let config = SyncConfig {
//!     remote_url: Some("https://backup.example.com/api".into()),
//!     quiescence_ms: 500,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

use crate::resilience::retry::RetryConfig;

/// Configuration for the sync engine.
///
/// All fields have defaults; an empty document deserializes to
/// [`SyncConfig::default()`].
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Backup service base URL (e.g., "https://backup.example.com/api")
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Bearer token sent with every backup request
    #[serde(default)]
    pub remote_token: Option<String>,

    /// Per-request timeout for the backup service
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Quiet period after the last write to a key before it is pushed
    #[serde(default = "default_quiescence_ms")]
    pub quiescence_ms: u64,

    /// Identity shared by every unauthenticated session on a device
    #[serde(default = "default_anonymous_id")]
    pub anonymous_id: String,

    /// Push anonymous data to the backup service as well.
    /// Off by default: anonymous data stays on the device.
    #[serde(default)]
    pub backup_anonymous: bool,

    /// Retry policy for pulls during a sync run
    #[serde(default)]
    pub pull_retry: RetryConfig,

    /// Calls observed before the backup circuit can open
    #[serde(default = "default_circuit_window")]
    pub circuit_window: usize,

    /// How long the backup circuit stays open before probing again
    #[serde(default = "default_circuit_recovery_ms")]
    pub circuit_recovery_ms: u64,
}

fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_quiescence_ms() -> u64 { 1_500 }
fn default_anonymous_id() -> String { "anonymous".to_string() }
fn default_circuit_window() -> usize { 8 }
fn default_circuit_recovery_ms() -> u64 { 30_000 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            quiescence_ms: default_quiescence_ms(),
            anonymous_id: default_anonymous_id(),
            backup_anonymous: false,
            pull_retry: RetryConfig::default(),
            circuit_window: default_circuit_window(),
            circuit_recovery_ms: default_circuit_recovery_ms(),
        }
    }
}

impl SyncConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
