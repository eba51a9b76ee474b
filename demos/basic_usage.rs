// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic backup-sync usage example.
//!
//! Demonstrates:
//! 1. Editing data anonymously (device-local only)
//! 2. Signing in with data from another device already backed up
//! 3. Merging the anonymous data into the account
//! 4. Debounced backup of later edits
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! Runs entirely in memory, no backup service needed.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=backup_sync=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backup_sync::{
    BackupEnvelope, DataKey, IdentityResolver, IdentityTransition, InMemoryBackup,
    MemoryLocalStore, MigrationDecision, SyncConfig, SyncEngine, SyncOptions,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use parking_lot::Mutex;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Stands in for the host app's auth session.
struct Session(Mutex<Option<String>>);

#[async_trait]
impl IdentityResolver for Session {
    async fn resolve(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           backup-sync: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. A backup that already holds data from another device
    // ─────────────────────────────────────────────────────────────────────────
    let remote = Arc::new(InMemoryBackup::new());
    remote.seed(
        "alice",
        "tags",
        BackupEnvelope::new("alice", "tags", json!([{"name": "work"}]), 1),
    );
    remote.seed(
        "alice",
        "theme",
        BackupEnvelope::new("alice", "theme", json!("solarized"), 1),
    );

    let config = SyncConfig {
        quiescence_ms: 200,
        ..Default::default()
    };
    let session = Arc::new(Session(Mutex::new(None)));
    let engine = SyncEngine::new(config, Arc::new(MemoryLocalStore::new()), remote.clone());
    engine.attach_resolver(session.clone());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Anonymous edits stay on the device
    // ─────────────────────────────────────────────────────────────────────────
    println!("👤 Starting anonymously...");
    engine.check_identity().await?;
    engine.set(DataKey::Tags, json!([{"name": "home"}]))?;
    engine.set(
        DataKey::DailyTasks,
        json!({"2024-03-01": [{"id": "t1", "title": "Water plants", "completed": true}]}),
    )?;
    println!("   Identity state: {}", engine.identity_state());
    println!("   Show device-only warning: {}", engine.anonymous_warning());
    engine.acknowledge_anonymous_warning()?;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Sign in: the engine asks before folding anonymous data in
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔑 Signing in as alice...");
    *session.0.lock() = Some("alice".into());
    if let IdentityTransition::MigrationPending { to } = engine.check_identity().await? {
        let pending = engine.pending_migration();
        let items = pending.as_ref().map(|p| p.item_count()).unwrap_or(0);
        println!("   {} anonymous item(s) waiting to move into '{}'", items, to);

        let report = engine.resolve_migration(MigrationDecision::Merge).await?;
        for (key, outcome) in &report.outcomes {
            println!("   {:<16} {}", key.as_str(), outcome);
        }
    }
    println!("   Tags now: {}", engine.get(DataKey::Tags).unwrap_or_default());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Later edits are debounced into one push per key
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n✏️  Editing the theme three times...");
    for theme in ["dark", "light", "dark"] {
        engine.set(DataKey::Theme, json!(theme))?;
    }
    println!("   Pending pushes: {:?}", engine.pending_pushes());
    tokio::time::sleep(Duration::from_millis(400)).await;
    let backed_up = remote.envelope("alice", "theme").map(|e| e.value);
    println!("   Backup now holds theme = {}", backed_up.unwrap_or_default());

    let report = engine.sync(SyncOptions::default()).await?;
    println!("   Sync complete: {} ({:?})", report.is_complete(), report.duration);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown();
    println!("   ✅ Shutdown complete! State: {}", engine.state());

    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key
                .labels()
                .map(|l| format!("{}={}", l.key(), l.value()))
                .collect();
            let label_str = if labels.is_empty() {
                String::new()
            } else {
                format!("{{{}}}", labels.join(","))
            };
            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => format!("{} sample(s)", samples.len()),
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
