// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for backup-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `backup_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `key`: data key name (`dailyTasks`, `theme`, ...)
//! - `operation`: push, pull, purge, status
//! - `outcome`: success, error kind, or decision name

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a local store write
pub fn record_local_write(key: &str) {
    counter!(
        "backup_sync_local_writes_total",
        "key" => key.to_string()
    )
    .increment(1);
}

/// Record a remote call outcome
pub fn record_remote_call(operation: &str, outcome: &str) {
    counter!(
        "backup_sync_remote_calls_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record remote call latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "backup_sync_remote_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a push fired by the scheduler
pub fn record_push(key: &str, outcome: &str) {
    counter!(
        "backup_sync_pushes_total",
        "key" => key.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record bytes sent in a push
pub fn record_bytes_pushed(bytes: usize) {
    counter!("backup_sync_pushed_bytes_total").increment(bytes as u64);
}

/// Record a schedule call; `coalesced` when it replaced a pending timer
pub fn record_schedule(key: &str, coalesced: bool) {
    let event = if coalesced { "coalesced" } else { "scheduled" };
    counter!(
        "backup_sync_schedules_total",
        "key" => key.to_string(),
        "event" => event
    )
    .increment(1);
}

/// Record timers dropped without firing
pub fn record_cancelled(count: usize) {
    counter!("backup_sync_cancelled_pushes_total").increment(count as u64);
}

/// Set number of keys waiting for their quiescence window
pub fn set_pending_pushes(count: usize) {
    gauge!("backup_sync_pending_pushes").set(count as f64);
}

/// Record the outcome of reconciling one key
pub fn record_reconcile(key: &str, outcome: &str) {
    counter!(
        "backup_sync_reconciled_keys_total",
        "key" => key.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a sync run
pub fn record_sync_run(outcome: &str, duration: Duration) {
    counter!(
        "backup_sync_runs_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("backup_sync_run_seconds").record(duration.as_secs_f64());
}

/// Record an identity transition
pub fn record_identity_transition(transition: &str) {
    counter!(
        "backup_sync_identity_transitions_total",
        "transition" => transition.to_string()
    )
    .increment(1);
}

/// Record how a pending migration was resolved
pub fn record_migration(decision: &str, remote_ok: bool) {
    let remote = if remote_ok { "synced" } else { "local_only" };
    counter!(
        "backup_sync_migrations_total",
        "decision" => decision.to_string(),
        "remote" => remote
    )
    .increment(1);
}

/// Record circuit breaker call
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "backup_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records remote latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
