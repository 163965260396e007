//! Storage handler: the operation surface over a storage backend
//!
//! Every public operation catches backend failures, logs them with the
//! backend tag, subject and operation, and returns a safe default. Nothing
//! above this layer sees a backend error.

use dashmap::DashSet;
use dutylog_core::{
    Clock, LivenessCheck, OriginResolver, StorageBackend, SubjectDirectory,
    subject::{OpenSession, SubjectId, VoteRecord},
    timestamp::{VOTE_TIME_FORMAT, normalize_vote_timestamp},
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::reconcile::{self, ReconcileStats, ReconcileTask};

/// Result of trying to persist a duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccumulateOutcome {
    Written,
    /// Nothing was written and retrying will not help
    Skipped,
    /// The backend failed; the caller should keep its source data
    Failed,
}

/// Removes the subject from the in-flight set when the close finishes
struct CloseGuard<'a> {
    closing: &'a DashSet<SubjectId>,
    subject_id: SubjectId,
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        self.closing.remove(&self.subject_id);
    }
}

pub struct StorageHandler {
    backend: Arc<dyn StorageBackend>,
    directory: Arc<dyn SubjectDirectory>,
    origin: Arc<OriginResolver>,
    clock: Arc<dyn Clock>,
    closing: DashSet<SubjectId>,
    reconciliation: Mutex<Option<ReconcileTask>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for StorageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandler")
            .field("backend", &self.backend.kind())
            .field("closing", &self.closing.len())
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl StorageHandler {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        directory: Arc<dyn SubjectDirectory>,
        origin: Arc<OriginResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            directory,
            origin,
            clock,
            closing: DashSet::new(),
            reconciliation: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Backend tag used in log lines
    pub fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn origin(&self) -> &Arc<OriginResolver> {
        &self.origin
    }

    /// Whether the backend answers a ping
    pub async fn is_available(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                error!("[{}] Backend unreachable: {}", self.kind(), e);
                false
            }
        }
    }

    /// Open a session at the current time
    pub async fn open(&self, subject_id: SubjectId, display_name: &str) {
        self.open_at(subject_id, display_name, self.clock.now_millis())
            .await
    }

    /// Open a session at `now_ms`, overwriting any session the subject already has
    pub async fn open_at(&self, subject_id: SubjectId, display_name: &str, now_ms: i64) {
        let session = OpenSession {
            subject_id,
            display_name: display_name.to_string(),
            started_at_ms: now_ms,
            origin: self.origin.resolve(),
        };

        if let Err(e) = self.backend.upsert_session(&session).await {
            error!(
                "[{}] open failed for {} ({}): {}",
                self.kind(),
                subject_id,
                display_name,
                e
            );
        }
    }

    /// Close the subject's open session, if any, and persist its duration
    ///
    /// The duration is written before the session row is deleted, and the
    /// delete only matches the session that was read. A close racing a
    /// reopen therefore leaves the new session alone. Concurrent closes of
    /// the same subject in this process collapse into one.
    pub async fn close(&self, subject_id: SubjectId) {
        self.close_matching(subject_id, None).await;
    }

    /// Close the subject's session only if it is still the one opened at `started_at_ms`
    ///
    /// Used by the sweep, which decides on a session it listed earlier. A
    /// subject who rejoined since then keeps the new session. Returns whether
    /// the session row was closed.
    pub async fn close_if_started_at(&self, subject_id: SubjectId, started_at_ms: i64) -> bool {
        self.close_matching(subject_id, Some(started_at_ms)).await
    }

    async fn close_matching(&self, subject_id: SubjectId, expected_start: Option<i64>) -> bool {
        if !self.closing.insert(subject_id) {
            debug!(
                "[{}] close already in flight for {}",
                self.kind(),
                subject_id
            );
            return false;
        }
        let _guard = CloseGuard {
            closing: &self.closing,
            subject_id,
        };

        let session = match self.backend.get_session(subject_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return false,
            Err(e) => {
                error!("[{}] close failed for {}: {}", self.kind(), subject_id, e);
                return false;
            }
        };

        if let Some(expected) = expected_start
            && session.started_at_ms != expected
        {
            debug!(
                "[{}] Session for {} was reopened at {}, leaving it open",
                self.kind(),
                subject_id,
                session.started_at_ms
            );
            return false;
        }

        let elapsed = session.elapsed_ms(self.clock.now_millis());
        if elapsed <= 0 {
            warn!(
                "[{}] Discarding non-positive duration {} ms for {} (clock moved backwards?)",
                self.kind(),
                elapsed,
                subject_id
            );
        } else {
            let outcome = self
                .persist_duration(
                    subject_id,
                    elapsed,
                    Some(&session.display_name),
                    &session.origin,
                )
                .await;
            if outcome == AccumulateOutcome::Failed {
                // Keep the session row so a later sweep can retry
                return false;
            }
        }

        match self
            .backend
            .delete_session(subject_id, session.started_at_ms)
            .await
        {
            Ok(true) => {
                debug!(
                    "[{}] Closed session for {} ({} ms)",
                    self.kind(),
                    subject_id,
                    elapsed
                );
                true
            }
            Ok(false) => {
                debug!(
                    "[{}] Session for {} was replaced before close finished",
                    self.kind(),
                    subject_id
                );
                false
            }
            Err(e) => {
                error!(
                    "[{}] close failed to delete session for {}: {}",
                    self.kind(),
                    subject_id,
                    e
                );
                false
            }
        }
    }

    /// Add `duration_ms` to the subject's total under the current origin
    pub async fn accumulate(&self, subject_id: SubjectId, duration_ms: i64) {
        if duration_ms <= 0 {
            warn!(
                "[{}] Discarding non-positive duration {} ms for {}",
                self.kind(),
                duration_ms,
                subject_id
            );
            return;
        }

        let fallback = match self.backend.get_session(subject_id).await {
            Ok(session) => session.map(|s| s.display_name),
            Err(e) => {
                warn!(
                    "[{}] accumulate could not read session name for {}: {}",
                    self.kind(),
                    subject_id,
                    e
                );
                None
            }
        };

        let origin = self.origin.resolve();
        self.persist_duration(subject_id, duration_ms, fallback.as_deref(), &origin)
            .await;
    }

    async fn persist_duration(
        &self,
        subject_id: SubjectId,
        duration_ms: i64,
        fallback_name: Option<&str>,
        origin: &str,
    ) -> AccumulateOutcome {
        let Some(display_name) = self.resolve_display_name(subject_id, fallback_name).await else {
            warn!(
                "[{}] Skipping accumulate for {}: no display name could be resolved",
                self.kind(),
                subject_id
            );
            return AccumulateOutcome::Skipped;
        };

        match self
            .backend
            .add_duration(subject_id, &display_name, origin, duration_ms)
            .await
        {
            Ok(()) => AccumulateOutcome::Written,
            Err(e) => {
                error!(
                    "[{}] accumulate failed for {} ({} ms): {}",
                    self.kind(),
                    subject_id,
                    duration_ms,
                    e
                );
                AccumulateOutcome::Failed
            }
        }
    }

    /// Live directory name, falling back to `fallback`; blank names count as missing
    async fn resolve_display_name(
        &self,
        subject_id: SubjectId,
        fallback: Option<&str>,
    ) -> Option<String> {
        let live = match self.directory.display_name(subject_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(
                    "[{}] Directory lookup failed for {}: {}",
                    self.kind(),
                    subject_id,
                    e
                );
                None
            }
        };

        live.filter(|name| !name.trim().is_empty())
            .or_else(|| {
                fallback
                    .filter(|name| !name.trim().is_empty())
                    .map(str::to_string)
            })
    }

    /// Sum of the subject's accumulation rows, 0 when absent
    pub async fn total_duration(&self, subject_id: SubjectId) -> i64 {
        match self.backend.accumulations(subject_id).await {
            Ok(rows) => rows.iter().map(|row| row.total_duration_ms).sum(),
            Err(e) => {
                error!(
                    "[{}] total_duration failed for {}: {}",
                    self.kind(),
                    subject_id,
                    e
                );
                0
            }
        }
    }

    /// Number of recorded votes, 0 when absent
    pub async fn total_votes(&self, subject_id: SubjectId) -> i32 {
        match self.backend.count_votes(subject_id).await {
            Ok(count) => i32::try_from(count).unwrap_or(i32::MAX),
            Err(e) => {
                error!(
                    "[{}] total_votes failed for {}: {}",
                    self.kind(),
                    subject_id,
                    e
                );
                0
            }
        }
    }

    /// Per-origin totals; blank origins are reported as `unknown`
    pub async fn duration_by_origin(&self, subject_id: SubjectId) -> BTreeMap<String, i64> {
        match self.backend.accumulations(subject_id).await {
            Ok(rows) => {
                let mut totals = BTreeMap::new();
                for row in &rows {
                    *totals.entry(row.origin_label().to_string()).or_insert(0) +=
                        row.total_duration_ms;
                }
                totals
            }
            Err(e) => {
                error!(
                    "[{}] duration_by_origin failed for {}: {}",
                    self.kind(),
                    subject_id,
                    e
                );
                BTreeMap::new()
            }
        }
    }

    /// Display name stored with the subject's accumulation rows
    pub async fn last_known_name(&self, subject_id: SubjectId) -> Option<String> {
        match self.backend.accumulations(subject_id).await {
            Ok(rows) => rows
                .into_iter()
                .map(|row| row.display_name)
                .find(|name| !name.trim().is_empty()),
            Err(e) => {
                error!(
                    "[{}] last_known_name failed for {}: {}",
                    self.kind(),
                    subject_id,
                    e
                );
                None
            }
        }
    }

    /// Append a vote; the timestamp is stored in canonical local form
    pub async fn record_vote(
        &self,
        subject_id: SubjectId,
        display_name: &str,
        service_name: &str,
        timestamp: &str,
    ) {
        let vote_time = match normalize_vote_timestamp(timestamp) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!(
                    "[{}] {} for vote of {}; using current time",
                    self.kind(),
                    e,
                    subject_id
                );
                self.clock.now_local().format(VOTE_TIME_FORMAT).to_string()
            }
        };

        let vote = VoteRecord {
            subject_id,
            display_name: display_name.to_string(),
            service_name: service_name.to_string(),
            vote_time,
        };

        if let Err(e) = self.backend.insert_vote(&vote).await {
            error!(
                "[{}] record_vote failed for {} ({}): {}",
                self.kind(),
                subject_id,
                service_name,
                e
            );
        }
    }

    /// Distinct subjects with any accumulation row
    pub async fn all_tracked_subjects(&self) -> BTreeSet<SubjectId> {
        match self.backend.tracked_subjects().await {
            Ok(subjects) => subjects.into_iter().collect(),
            Err(e) => {
                error!("[{}] all_tracked_subjects failed: {}", self.kind(), e);
                BTreeSet::new()
            }
        }
    }

    /// Snapshot of the vote ledger
    pub async fn all_votes(&self) -> Vec<VoteRecord> {
        match self.backend.all_votes().await {
            Ok(votes) => votes,
            Err(e) => {
                error!("[{}] all_votes failed: {}", self.kind(), e);
                Vec::new()
            }
        }
    }

    /// Every open session, for maintenance listings
    pub async fn open_sessions(&self) -> Vec<OpenSession> {
        match self.backend.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("[{}] open_sessions failed: {}", self.kind(), e);
                Vec::new()
            }
        }
    }

    /// Delete all accumulations and votes; returns whether both deletes ran
    pub async fn wipe(&self) -> bool {
        match self.backend.wipe().await {
            Ok(()) => true,
            Err(e) => {
                error!("[{}] wipe failed: {}", self.kind(), e);
                false
            }
        }
    }

    /// Move rows from origin `old` to `new`; returns the number of rows changed
    pub async fn rename_origin(&self, old: &str, new: &str) -> u64 {
        match self.backend.rename_origin(old, new).await {
            Ok(changed) => changed,
            Err(e) => {
                error!(
                    "[{}] rename_origin '{}' -> '{}' failed: {}",
                    self.kind(),
                    old,
                    new,
                    e
                );
                0
            }
        }
    }

    /// Distinct non-blank origin labels in storage
    pub async fn known_origins(&self) -> BTreeSet<String> {
        match self.backend.origins().await {
            Ok(origins) => origins,
            Err(e) => {
                error!("[{}] known_origins failed: {}", self.kind(), e);
                BTreeSet::new()
            }
        }
    }

    /// Close every open session whose subject is not live
    pub async fn reconcile_once(&self, liveness: &dyn LivenessCheck) -> ReconcileStats {
        reconcile::sweep(self, liveness).await
    }

    /// Start the periodic sweep; a running sweep is replaced
    pub async fn start_periodic_reconciliation(
        self: &Arc<Self>,
        liveness: Arc<dyn LivenessCheck>,
        interval: Duration,
    ) {
        if self.shut_down.load(Ordering::SeqCst) {
            warn!(
                "[{}] Not starting reconciliation on a shut down handler",
                self.kind()
            );
            return;
        }

        let task = reconcile::spawn_reconcile_task(Arc::downgrade(self), liveness, interval);
        let previous = self.reconciliation.lock().await.replace(task);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
    }

    /// Stop the periodic sweep and wait for it to finish
    pub async fn stop_periodic_reconciliation(&self) {
        let task = self.reconciliation.lock().await.take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }

    pub async fn is_reconciling(&self) -> bool {
        self.reconciliation.lock().await.is_some()
    }

    /// Stop reconciliation, then close the backend. Safe to call twice.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_periodic_reconciliation().await;
        self.backend.close().await;
        info!("[{}] Storage handler shut down", self.kind());
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
