//! Chaos Testing for the Sync Engine
//!
//! This module tests failure scenarios using:
//! 1. **FailingBackup wrapper** - precise error injection at specific call counts
//! 2. **Circuit breaking** - a dead backup service behind `GuardedBackup`
//! 3. **Identity churn** - the resolver changing its answer mid-migration
//! 4. **SlowBackup wrapper** - local writes landing while pulls are in flight
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use backup_sync::{
    BackupEnvelope, BackupStatus, CircuitConfig, DataKey, GuardedBackup, IdentityResolver,
    IdentityState, IdentityTransition, InMemoryBackup, KeyOutcome, MemoryLocalStore,
    MigrationDecision, RemoteBackup, RemoteError, RetryConfig, StaticIdentity, SyncConfig,
    SyncEngine, SyncOptions, Timestamp,
};

// =============================================================================
// Failing Backup Wrapper - Precise Error Injection
// =============================================================================

/// Wraps a backup and fails pulls on chosen call numbers (1-indexed).
struct FailingBackup {
    inner: InMemoryBackup,
    pull_calls: AtomicU64,
    fail_on_pulls: Vec<u64>,
    /// Keys whose pulls always fail with this error
    poisoned: Mutex<HashMap<String, RemoteError>>,
    pulls_by_key: Mutex<HashMap<String, u64>>,
}

impl FailingBackup {
    fn new(fail_on_pulls: Vec<u64>) -> Self {
        Self {
            inner: InMemoryBackup::new(),
            pull_calls: AtomicU64::new(0),
            fail_on_pulls,
            poisoned: Mutex::new(HashMap::new()),
            pulls_by_key: Mutex::new(HashMap::new()),
        }
    }

    fn poison(&self, key: DataKey, error: RemoteError) {
        self.poisoned.lock().insert(key.as_str().to_string(), error);
    }

    fn pulls_for(&self, key: DataKey) -> u64 {
        self.pulls_by_key.lock().get(key.as_str()).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RemoteBackup for FailingBackup {
    async fn push(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
        modified_at: Timestamp,
    ) -> Result<Timestamp, RemoteError> {
        self.inner.push(user_id, key, value, modified_at).await
    }

    async fn pull(&self, user_id: &str, key: &str) -> Result<Option<BackupEnvelope>, RemoteError> {
        let call = self.pull_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.pulls_by_key.lock().entry(key.to_string()).or_insert(0) += 1;

        if let Some(error) = self.poisoned.lock().get(key).cloned() {
            return Err(error);
        }
        if self.fail_on_pulls.contains(&call) {
            return Err(RemoteError::Unreachable(format!("injected failure on pull {}", call)));
        }
        self.inner.pull(user_id, key).await
    }

    async fn purge(&self, user_id: &str) -> Result<u64, RemoteError> {
        self.inner.purge(user_id).await
    }

    async fn status(&self) -> Result<BackupStatus, RemoteError> {
        self.inner.status().await
    }
}

// =============================================================================
// Slow Backup Wrapper - Writes During a Sync
// =============================================================================

/// Delays every pull, so local writes can land while a sync is in flight.
struct SlowBackup {
    inner: InMemoryBackup,
    pull_delay: Duration,
}

impl SlowBackup {
    fn new(pull_delay: Duration) -> Self {
        Self {
            inner: InMemoryBackup::new(),
            pull_delay,
        }
    }
}

#[async_trait]
impl RemoteBackup for SlowBackup {
    async fn push(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
        modified_at: Timestamp,
    ) -> Result<Timestamp, RemoteError> {
        self.inner.push(user_id, key, value, modified_at).await
    }

    async fn pull(&self, user_id: &str, key: &str) -> Result<Option<BackupEnvelope>, RemoteError> {
        tokio::time::sleep(self.pull_delay).await;
        self.inner.pull(user_id, key).await
    }

    async fn purge(&self, user_id: &str) -> Result<u64, RemoteError> {
        self.inner.purge(user_id).await
    }

    async fn status(&self) -> Result<BackupStatus, RemoteError> {
        self.inner.status().await
    }
}

/// Resolver whose answer can change between checks.
struct SwitchableIdentity(Mutex<Option<String>>);

impl SwitchableIdentity {
    fn new(user: Option<&str>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(user.map(str::to_string))))
    }

    fn set(&self, user: Option<&str>) {
        *self.0.lock() = user.map(str::to_string);
    }
}

#[async_trait]
impl IdentityResolver for SwitchableIdentity {
    async fn resolve(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        factor: 2.0,
    }
}

fn config_with(pull_retry: RetryConfig) -> SyncConfig {
    SyncConfig {
        pull_retry,
        ..Default::default()
    }
}

// =============================================================================
// Injected Pull Failures
// =============================================================================

#[tokio::test]
async fn chaos_transient_pull_failures_are_retried() {
    let remote = Arc::new(FailingBackup::new(vec![1, 2, 3]));
    remote
        .inner
        .seed("u1", "tags", BackupEnvelope::new("u1", "tags", json!([{"name": "work"}]), 10));

    let engine = SyncEngine::new(
        config_with(fast_retry()),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    engine.attach_resolver(Arc::new(StaticIdentity(Some("u1".into()))));
    engine.check_identity().await.unwrap();

    let total_pulls = remote.pull_calls.load(Ordering::SeqCst);
    assert_eq!(total_pulls, DataKey::ALL.len() as u64 + 3);
    assert_eq!(engine.get(DataKey::Tags), Some(json!([{"name": "work"}])));
}

#[tokio::test]
async fn chaos_client_errors_are_not_retried() {
    let remote = Arc::new(FailingBackup::new(vec![]));
    remote.poison(
        DataKey::Habits,
        RemoteError::Rejected {
            status: 403,
            reason: "forbidden".into(),
        },
    );
    let engine = SyncEngine::new(
        config_with(fast_retry()),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    engine.attach_resolver(Arc::new(StaticIdentity(Some("u1".into()))));
    engine.check_identity().await.unwrap();

    let report = engine.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.skipped_keys(), vec![DataKey::Habits]);
    // One pull at sign-in, one for the explicit sync
    assert_eq!(remote.pulls_for(DataKey::Habits), 2);
}

#[tokio::test]
async fn chaos_server_errors_exhaust_retries_then_skip() {
    let remote = Arc::new(FailingBackup::new(vec![]));
    remote.poison(
        DataKey::Tags,
        RemoteError::Rejected {
            status: 503,
            reason: "overloaded".into(),
        },
    );
    let engine = SyncEngine::new(
        config_with(fast_retry()),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    engine.attach_resolver(Arc::new(StaticIdentity(Some("u1".into()))));
    engine.check_identity().await.unwrap();
    engine.set(DataKey::Tags, json!([{"name": "local"}])).unwrap();

    let report = engine.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.skipped_keys(), vec![DataKey::Tags]);
    assert_eq!(remote.pulls_for(DataKey::Tags), 6);
    assert_eq!(engine.get(DataKey::Tags), Some(json!([{"name": "local"}])));
}

// =============================================================================
// Circuit Breaking
// =============================================================================

#[tokio::test]
async fn chaos_dead_backup_trips_circuit() {
    let config = CircuitConfig {
        error_rate: 0.5,
        window: 2,
        half_open_probes: 1,
        recovery_timeout: Duration::from_secs(60),
    };
    let guarded = Arc::new(GuardedBackup::new(InMemoryBackup::new(), config));
    let engine = SyncEngine::new(
        config_with(RetryConfig::none()),
        Arc::new(MemoryLocalStore::new()),
        guarded.clone(),
    );
    engine.attach_resolver(Arc::new(StaticIdentity(Some("u1".into()))));
    engine.check_identity().await.unwrap();
    engine.set(DataKey::Tags, json!([{"name": "survivor"}])).unwrap();

    guarded.inner().set_reachable(false);
    let first = engine.sync(SyncOptions::default()).await.unwrap();
    let second = engine.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(first.skipped_keys().len(), DataKey::ALL.len());
    assert_eq!(second.skipped_keys().len(), DataKey::ALL.len());
    assert!(guarded.breaker().stats().rejections > 0);
    assert_eq!(engine.get(DataKey::Tags), Some(json!([{"name": "survivor"}])));
}

// =============================================================================
// Read-only Backup
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_failed_push_waits_for_next_edit() {
    let remote = Arc::new(InMemoryBackup::new());
    let engine = SyncEngine::new(
        config_with(RetryConfig::none()),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    engine.attach_resolver(Arc::new(StaticIdentity(Some("u1".into()))));
    engine.check_identity().await.unwrap();

    remote.set_writable(false);
    engine.set(DataKey::Tags, json!([{"name": "first"}])).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(remote.envelope("u1", "tags").is_none());
    assert!(engine.pending_pushes().is_empty());
    assert_eq!(engine.get(DataKey::Tags), Some(json!([{"name": "first"}])));

    remote.set_writable(true);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(remote.envelope("u1", "tags").is_none());

    engine.set(DataKey::Tags, json!([{"name": "second"}])).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        remote.envelope("u1", "tags").unwrap().value,
        json!([{"name": "second"}])
    );
}

// =============================================================================
// Identity Churn
// =============================================================================

#[tokio::test]
async fn chaos_identity_change_abandons_pending_migration() {
    let remote = Arc::new(InMemoryBackup::new());
    let resolver = SwitchableIdentity::new(None);
    let engine = SyncEngine::new(
        config_with(RetryConfig::none()),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    engine.attach_resolver(resolver.clone());
    engine.check_identity().await.unwrap();
    engine.set(DataKey::WeeklyGoals, json!([{"id": "g1", "progress": 40}])).unwrap();

    resolver.set(Some("u1"));
    assert_eq!(
        engine.check_identity().await.unwrap(),
        IdentityTransition::MigrationPending { to: "u1".into() }
    );
    // Asking again without a decision keeps waiting
    assert_eq!(
        engine.check_identity().await.unwrap(),
        IdentityTransition::MigrationPending { to: "u1".into() }
    );

    resolver.set(Some("u2"));
    assert_eq!(
        engine.check_identity().await.unwrap(),
        IdentityTransition::MigrationPending { to: "u2".into() }
    );
    assert_eq!(engine.pending_migration().unwrap().to, "u2");

    engine.resolve_migration(MigrationDecision::Merge).await.unwrap();

    assert_eq!(engine.identity_state(), IdentityState::AuthenticatedActive);
    assert_eq!(
        remote.envelope("u2", "weeklyGoals").unwrap().value,
        json!([{"id": "g1", "progress": 40}])
    );
    assert!(remote.envelope("u1", "weeklyGoals").is_none());
}

#[tokio::test]
async fn chaos_sign_out_mid_migration_returns_to_anonymous() {
    let remote = Arc::new(InMemoryBackup::new());
    let resolver = SwitchableIdentity::new(None);
    let engine = SyncEngine::new(
        config_with(RetryConfig::none()),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    engine.attach_resolver(resolver.clone());
    engine.check_identity().await.unwrap();
    engine.set(DataKey::Tags, json!([{"name": "kept"}])).unwrap();

    resolver.set(Some("u1"));
    engine.check_identity().await.unwrap();

    resolver.set(None);
    let transition = engine.check_identity().await.unwrap();

    assert!(matches!(transition, IdentityTransition::Unchanged(_)));
    assert_eq!(engine.identity_state(), IdentityState::AnonymousActive);
    assert!(engine.pending_migration().is_none());
    assert_eq!(engine.get(DataKey::Tags), Some(json!([{"name": "kept"}])));
}

#[tokio::test(start_paused = true)]
async fn chaos_switch_flushes_previous_account_edits() {
    let remote = Arc::new(InMemoryBackup::new());
    let resolver = SwitchableIdentity::new(Some("alice"));
    let engine = SyncEngine::new(
        config_with(RetryConfig::none()),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    engine.attach_resolver(resolver.clone());
    engine.check_identity().await.unwrap();
    let edited_at = engine.set(DataKey::Tags, json!([{"name": "alice-tag"}])).unwrap();

    resolver.set(Some("bob"));
    let transition = engine.check_identity().await.unwrap();

    assert!(matches!(transition, IdentityTransition::Switched { .. }));
    assert!(engine.get(DataKey::Tags).is_none());
    let flushed = remote.envelope("alice", "tags").unwrap();
    assert_eq!(flushed.value, json!([{"name": "alice-tag"}]));
    assert_eq!(flushed.modified_at, edited_at);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(remote.push_count(), 1);
    assert!(remote.envelope("bob", "tags").is_none());
}

// =============================================================================
// Sync Ordering
// =============================================================================

fn slow_engine(remote: Arc<SlowBackup>) -> SyncEngine {
    let engine = SyncEngine::new(
        config_with(RetryConfig::none()),
        Arc::new(MemoryLocalStore::new()),
        remote,
    );
    engine.attach_resolver(Arc::new(StaticIdentity(Some("u1".into()))));
    engine
}

#[tokio::test(start_paused = true)]
async fn chaos_write_during_sync_survives_it() {
    let remote = Arc::new(SlowBackup::new(Duration::from_millis(200)));
    remote
        .inner
        .seed("u1", "tags", BackupEnvelope::new("u1", "tags", json!([{"name": "r"}]), 10));
    let engine = slow_engine(remote.clone());
    engine.check_identity().await.unwrap();
    engine.set(DataKey::Tags, json!([{"name": "a"}])).unwrap();

    let (report, _) = tokio::join!(engine.sync(SyncOptions::default()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.set(DataKey::Tags, json!([{"name": "fresh"}])).unwrap();
    });

    let report = report.unwrap();
    let expected = json!([{"name": "r"}, {"name": "fresh"}]);
    assert_eq!(report.value(DataKey::Tags), Some(&expected));
    assert_eq!(engine.get(DataKey::Tags), Some(expected.clone()));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(remote.inner.envelope("u1", "tags").unwrap().value, expected);
}

#[tokio::test(start_paused = true)]
async fn chaos_adopted_remote_is_not_overwritten_by_older_push() {
    let remote = Arc::new(SlowBackup::new(Duration::from_millis(200)));
    let engine = slow_engine(remote.clone());
    engine.check_identity().await.unwrap();

    let edited_at = engine
        .set(DataKey::Tags, json!([{"name": "keep"}, {"name": "gone"}]))
        .unwrap();
    // Another device deleted "gone" after this edit
    remote.inner.seed(
        "u1",
        "tags",
        BackupEnvelope::new("u1", "tags", json!([{"name": "keep"}]), edited_at + 10_000),
    );

    let report = engine.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.outcome(DataKey::Tags), Some(&KeyOutcome::AdoptedRemote));
    assert!(engine.pending_pushes().is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    let backed_up = remote.inner.envelope("u1", "tags").unwrap();
    assert_eq!(backed_up.value, json!([{"name": "keep"}]));
    assert_eq!(backed_up.modified_at, edited_at + 10_000);
    assert_eq!(remote.inner.push_count(), 0);

    engine.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(engine.get(DataKey::Tags), Some(json!([{"name": "keep"}])));
}
