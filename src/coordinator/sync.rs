// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator: pull → resolve → reconcile → report.
//!
//! ```text
//!   for every key, concurrently:  pull (bounded retry)
//!   for every key, in order:      read local record
//!                                 resolve(local, remote)
//!                                 write reconciled value locally
//!                                 queue upload if the backup is behind
//! ```
//!
//! A failed pull skips its key and leaves the local value alone. Only local
//! store failures abort a run.
//!
//! The local side is read after the pulls return, and the reconciled value
//! is written only while the record still carries the timestamp it was
//! resolved against. A write made while a run is in flight always survives
//! it and keeps its own pending push.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::identity::IdentityState;
use crate::keys::DataKey;
use crate::merge::Resolution;
use crate::metrics;
use crate::record::{now_millis, BackupEnvelope, Record, Timestamp};
use crate::remote::RemoteError;
use crate::resilience::retry::retry;

use super::lifecycle::RunGuard;
use super::{EngineState, KeyOutcome, SyncEngine, SyncError, SyncOptions, SyncReport};

/// Where the local side of a run comes from.
pub(super) enum LocalInput {
    /// Read each key from the local store
    Store,
    /// Use these records instead (anonymous data being merged in), unless
    /// the store moves past them during the run
    Snapshot(Vec<Record>),
    /// Nothing local (anonymous data discarded)
    Empty,
}

/// A reconciled value the backup is missing or behind on.
#[derive(Debug, Clone)]
pub(super) struct Upload {
    pub(super) key: DataKey,
    pub(super) value: Value,
    pub(super) modified_at: Timestamp,
}

/// Pull failures worth another attempt within the same run.
fn is_transient(err: &RemoteError) -> bool {
    match err {
        RemoteError::Unreachable(_) => true,
        RemoteError::Rejected { status, .. } => *status >= 500,
        RemoteError::MalformedEnvelope { .. } => false,
    }
}

impl SyncEngine {
    /// Reconcile every key with the backup for the current identity.
    ///
    /// A normal run started while another is in flight returns at once
    /// with [`SyncReport::skipped_concurrent`] set. Forced runs always
    /// proceed.
    #[tracing::instrument(skip(self), fields(user_id))]
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport, SyncError> {
        if self.identity_state() == IdentityState::MigrationPending {
            return Err(SyncError::MigrationPending);
        }
        let user_id = self.active_user_id().ok_or(SyncError::NoIdentity)?;
        tracing::Span::current().record("user_id", user_id.as_str());

        let guard = if options.force {
            RunGuard::force(&self.runs_in_flight)
        } else {
            match RunGuard::try_acquire(&self.runs_in_flight) {
                Some(guard) => guard,
                None => {
                    debug!("Sync already in flight, coalescing");
                    metrics::record_sync_run("coalesced", Duration::ZERO);
                    return Ok(SyncReport::coalesced(&user_id));
                }
            }
        };

        if self.identity.read().is_anonymous() && !self.config.backup_anonymous {
            drop(guard);
            debug!("Anonymous data is device-local, nothing to reconcile");
            return Ok(self.local_only_report(&user_id));
        }

        let (report, uploads) = self.run(&user_id, LocalInput::Store, guard).await?;
        self.schedule_uploads(&user_id, uploads);
        Ok(report)
    }

    /// Queue debounced pushes for a run's uploads.
    pub(super) fn schedule_uploads(&self, user_id: &str, uploads: Vec<Upload>) {
        for upload in uploads {
            if self.is_current(&upload) {
                self.scheduler
                    .schedule(user_id, upload.key.as_str(), upload.value, upload.modified_at);
            }
        }
    }

    /// Whether the local record still carries the upload's timestamp. A
    /// key written again since the run has already queued its own push.
    pub(super) fn is_current(&self, upload: &Upload) -> bool {
        let current = self.local.modified_at(upload.key.as_str()) == Some(upload.modified_at);
        if !current {
            debug!(key = %upload.key, "Local value moved on, upload dropped");
        }
        current
    }

    /// Forced run used by identity transitions.
    pub(super) async fn run_forced(
        &self,
        user_id: &str,
        input: LocalInput,
    ) -> Result<(SyncReport, Vec<Upload>), SyncError> {
        let guard = RunGuard::force(&self.runs_in_flight);
        self.run(user_id, input, guard).await
    }

    async fn run(
        &self,
        user_id: &str,
        input: LocalInput,
        guard: RunGuard<'_>,
    ) -> Result<(SyncReport, Vec<Upload>), SyncError> {
        let started = Instant::now();
        self.set_state(EngineState::Syncing);

        let result = self.reconcile_all(user_id, input).await;

        drop(guard);
        self.settle_state();

        let elapsed = started.elapsed();
        match &result {
            Ok((report, uploads)) => {
                let outcome = if report.is_complete() { "completed" } else { "partial" };
                metrics::record_sync_run(outcome, elapsed);
                info!(
                    user_id,
                    skipped = report.skipped_keys().len(),
                    uploads = uploads.len(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Sync run finished"
                );
            }
            Err(e) => {
                metrics::record_sync_run("failed", elapsed);
                warn!(user_id, error = %e, "Sync run aborted");
            }
        }

        result.map(|(mut report, uploads)| {
            report.duration = elapsed;
            (report, uploads)
        })
    }

    async fn reconcile_all(
        &self,
        user_id: &str,
        input: LocalInput,
    ) -> Result<(SyncReport, Vec<Upload>), SyncError> {
        // The store itself is read per key once the pulls are back.
        let mut captured: BTreeMap<DataKey, Record> = match input {
            LocalInput::Store | LocalInput::Empty => BTreeMap::new(),
            LocalInput::Snapshot(records) => records
                .into_iter()
                .filter_map(|r| DataKey::parse(&r.key).map(|key| (key, r)))
                .collect(),
        };

        let pulls = join_all(
            DataKey::ALL
                .into_iter()
                .map(|key| async move { (key, self.pull(user_id, key).await) }),
        )
        .await;

        let mut report = SyncReport {
            user_id: user_id.to_string(),
            outcomes: BTreeMap::new(),
            records: BTreeMap::new(),
            skipped_concurrent: false,
            duration: Duration::ZERO,
        };
        let mut uploads = Vec::new();

        for (key, pulled) in pulls {
            let outcome = match pulled {
                Ok(remote) => {
                    let current = self.local.record(key.as_str());
                    let local = settle_local(captured.remove(&key), current);
                    let (outcome, record) =
                        self.reconcile_key(key, local.as_ref(), remote.as_ref(), &mut uploads)?;
                    if let Some(record) = record {
                        report.records.insert(key, record);
                    }
                    outcome
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Pull failed, keeping local value");
                    if let Some(current) = self.local.record(key.as_str()) {
                        report.records.insert(key, current);
                    }
                    KeyOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
            };
            debug!(key = %key, outcome = %outcome, "Key reconciled");
            metrics::record_reconcile(key.as_str(), outcome.label());
            report.outcomes.insert(key, outcome);
        }

        Ok((report, uploads))
    }

    fn reconcile_key(
        &self,
        key: DataKey,
        local: Option<&Record>,
        remote: Option<&BackupEnvelope>,
        uploads: &mut Vec<Upload>,
    ) -> Result<(KeyOutcome, Option<Record>), SyncError> {
        let name = key.as_str();
        let resolved = self.merge.resolve(
            key,
            local.map(|r| (&r.value, r.modified_at)),
            remote.map(|e| (&e.value, e.modified_at)),
        );

        let (outcome, modified_at) = match (resolved.resolution, local, remote) {
            (Resolution::Empty, _, _) => return Ok((KeyOutcome::Empty, None)),
            (Resolution::AdoptRemote, _, Some(env)) => {
                (KeyOutcome::AdoptedRemote, env.modified_at)
            }
            (Resolution::KeepLocal, Some(record), Some(_)) => {
                (KeyOutcome::KeptLocal, record.modified_at)
            }
            (Resolution::KeepLocal, Some(record), None) => {
                (KeyOutcome::Uploaded, record.modified_at)
            }
            _ => (KeyOutcome::Merged, now_millis()),
        };

        if !self.write_reconciled(name, local, &resolved.value, modified_at)? {
            debug!(key = %key, "Local value changed during sync, newer edit kept");
            return Ok((KeyOutcome::KeptLocal, self.local.record(name)));
        }

        if outcome == KeyOutcome::AdoptedRemote {
            self.scheduler.cancel_superseded(name, modified_at);
        } else {
            uploads.push(Upload {
                key,
                value: resolved.value.clone(),
                modified_at,
            });
        }

        Ok((outcome, Some(Record::with_timestamp(name, resolved.value, modified_at))))
    }

    /// Write the reconciled value unless the local record moved past the
    /// one it was resolved against. Returns `false` when it moved.
    fn write_reconciled(
        &self,
        key: &str,
        read: Option<&Record>,
        value: &Value,
        modified_at: Timestamp,
    ) -> Result<bool, SyncError> {
        let expected = read.map(|r| r.modified_at);
        if read.is_some_and(|r| &r.value == value && r.modified_at == modified_at) {
            return Ok(self.local.modified_at(key) == expected);
        }
        Ok(self.local.restore_if(key, expected, value.clone(), modified_at)?)
    }

    async fn pull(&self, user_id: &str, key: DataKey) -> Result<Option<BackupEnvelope>, RemoteError> {
        retry("pull", &self.config.pull_retry, is_transient, || {
            self.remote.pull(user_id, key.as_str())
        })
        .await
    }

    fn local_only_report(&self, user_id: &str) -> SyncReport {
        let mut report = SyncReport {
            user_id: user_id.to_string(),
            outcomes: BTreeMap::new(),
            records: BTreeMap::new(),
            skipped_concurrent: false,
            duration: Duration::ZERO,
        };
        for key in DataKey::ALL {
            match self.local.record(key.as_str()) {
                Some(record) => {
                    report.outcomes.insert(key, KeyOutcome::KeptLocal);
                    report.records.insert(key, record);
                }
                None => {
                    report.outcomes.insert(key, KeyOutcome::Empty);
                }
            }
        }
        report
    }
}

/// Local side of a key after the pulls: the captured record while the
/// store still carries its timestamp, otherwise whatever the store holds now.
fn settle_local(captured: Option<Record>, current: Option<Record>) -> Option<Record> {
    match (captured, current) {
        (Some(captured), Some(current)) if captured.modified_at == current.modified_at => {
            Some(captured)
        }
        (_, current) => current,
    }
}
