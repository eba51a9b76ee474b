//! # Backup Sync
//!
//! A local-first sync and conflict-resolution engine for a personal
//! productivity store.
//!
//! ## Architecture
//!
//! Local data is authoritative for reads and writes. A per-user backup
//! service holds a last-write-wins copy of every key; all merge logic runs
//! on the client.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SyncEngine                          │
//! │  • set()/get() never wait on the network                    │
//! │  • sync() / check_identity() / resolve_migration()          │
//! └─────────────────────────────────────────────────────────────┘
//!        │ write                                   │ sync run
//!        ▼                                         ▼
//! ┌──────────────────────┐          ┌──────────────────────────┐
//! │     Local Store      │◄─────────│       Merge Engine       │
//! │  • value + modified  │ reconcile│  • per-key strategies    │
//! │    stamped together  │          │  • union by identity     │
//! └──────────────────────┘          └──────────────────────────┘
//!        │ schedule                                ▲ pull
//!        ▼                                         │
//! ┌──────────────────────┐          ┌──────────────────────────┐
//! │   Backup Scheduler   │  push    │      Remote Backup       │
//! │  • one timer per key │─────────►│  • (userId, key) → value │
//! │  • debounce window   │          │  • circuit breaker       │
//! └──────────────────────┘          └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use backup_sync::{
//!     DataKey, GuardedBackup, HttpBackupClient, MemoryLocalStore, StaticIdentity, SyncConfig,
//!     SyncEngine, SyncOptions,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig {
//!         remote_url: Some("https://backup.example.com/api".into()),
//!         ..Default::default()
//!     };
//!     let http = HttpBackupClient::from_config(&config).expect("remote_url is set")?;
//!     let remote = Arc::new(GuardedBackup::from_config(http, &config));
//!
//!     let engine = SyncEngine::new(config, Arc::new(MemoryLocalStore::new()), remote);
//!     engine.attach_resolver(Arc::new(StaticIdentity(Some("user-42".into()))));
//!     engine.check_identity().await?;
//!
//!     engine.set(DataKey::Tags, json!([{"name": "work"}]))?;
//!     let report = engine.sync(SyncOptions::default()).await?;
//!     println!("{}", report.snapshot());
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Debounced Backup**: Bursts of edits to a key produce one push
//! - **Semantic Merge**: Collections merge as unions keyed by item identity
//! - **Deletion Propagation**: Same-age or newer backups win outright
//! - **Anonymous Migration**: Signing in asks before folding device data in
//! - **Circuit Breakers**: Dead backups fail fast instead of stalling syncs
//! - **Retry Logic**: Bounded retry for pulls within a run
//!
//! ## Configuration
//!
//! See [`SyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`coordinator`]: The main [`SyncEngine`] orchestrating all components
//! - [`storage`]: Local store backends (memory, JSON file)
//! - [`remote`]: Backup service clients (HTTP, in-memory, circuit-guarded)
//! - [`scheduler`]: Debounced push timers
//! - [`merge`]: Conflict resolution strategies
//! - [`identity`]: Identity state and migration types
//! - [`resilience`]: Circuit breakers and retry logic

pub mod config;
pub mod record;
pub mod keys;
pub mod storage;
pub mod remote;
pub mod scheduler;
pub mod merge;
pub mod identity;
pub mod resilience;
pub mod coordinator;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::SyncConfig;
pub use record::{BackupEnvelope, Record, Timestamp};
pub use keys::{DataKey, KeyKind};
pub use storage::{FileLocalStore, LocalStore, MemoryLocalStore, StorageError};
pub use remote::{BackupStatus, GuardedBackup, HttpBackupClient, InMemoryBackup, RemoteBackup, RemoteError};
pub use scheduler::BackupScheduler;
pub use merge::{MergeEngine, MergeStrategy, Resolution, Resolved};
pub use identity::{
    Identity, IdentityResolver, IdentityState, IdentityTransition, MigrationDecision,
    PendingMigration, StaticIdentity,
};
pub use coordinator::{EngineState, KeyOutcome, SyncEngine, SyncError, SyncOptions, SyncReport};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitStats};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
