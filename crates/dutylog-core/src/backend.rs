//! Storage backend trait
//!
//! The `StorageBackend` trait is the raw persistence surface for sessions,
//! accumulated durations and votes. Two implementations exist:
//! - `SqliteBackend`: single-file embedded database
//! - `MySqlBackend`: networked MySQL / MariaDB server
//!
//! Backends propagate every failure as `Error`. Callers are expected to go
//! through the storage handler, which turns those failures into logged,
//! defaulted results.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::{
    Result,
    subject::{Accumulation, OpenSession, SubjectId, VoteRecord},
};

/// Storage backend trait
///
/// # Example
/// ```no_run
/// # use dutylog_core::backend::StorageBackend;
/// # use dutylog_core::subject::SubjectId;
/// # async fn example(backend: &dyn StorageBackend, id: SubjectId) -> dutylog_core::Result<()> {
/// if let Some(session) = backend.get_session(id).await? {
///     backend.add_duration(id, &session.display_name, &session.origin, 1_000).await?;
///     backend.delete_session(id, session.started_at_ms).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend tag used in log lines (`SQLite`, `MySQL`)
    fn kind(&self) -> &'static str;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<()>;

    /// Insert a session or overwrite the existing one for the same subject
    ///
    /// Overwrites `started_at_ms`, `origin` and `display_name`.
    async fn upsert_session(&self, session: &OpenSession) -> Result<()>;

    /// Fetch the open session for a subject, if any
    async fn get_session(&self, subject_id: SubjectId) -> Result<Option<OpenSession>>;

    /// Delete the session opened at `started_at_ms`
    ///
    /// Returns `false` when no matching row existed, which happens when the
    /// session was already closed or was reopened in the meantime.
    async fn delete_session(&self, subject_id: SubjectId, started_at_ms: i64) -> Result<bool>;

    /// List every open session
    async fn list_sessions(&self) -> Result<Vec<OpenSession>>;

    /// Add `duration_ms` to the subject's running total for `origin`
    ///
    /// Creates the row on first use. Refreshes the stored display name.
    async fn add_duration(
        &self,
        subject_id: SubjectId,
        display_name: &str,
        origin: &str,
        duration_ms: i64,
    ) -> Result<()>;

    /// All accumulation rows of a subject (one per origin)
    async fn accumulations(&self, subject_id: SubjectId) -> Result<Vec<Accumulation>>;

    /// Distinct subjects with at least one accumulation row
    async fn tracked_subjects(&self) -> Result<Vec<SubjectId>>;

    /// Append a vote to the ledger
    async fn insert_vote(&self, vote: &VoteRecord) -> Result<()>;

    /// Number of votes recorded for a subject
    async fn count_votes(&self, subject_id: SubjectId) -> Result<i64>;

    /// Full vote ledger
    async fn all_votes(&self) -> Result<Vec<VoteRecord>>;

    /// Delete all accumulation rows, then all vote rows
    async fn wipe(&self) -> Result<()>;

    /// Rewrite origin `old` to `new` on accumulation and session rows
    ///
    /// Returns the number of rows changed.
    async fn rename_origin(&self, old: &str, new: &str) -> Result<u64>;

    /// Distinct non-blank origin labels across accumulations and sessions
    async fn origins(&self) -> Result<BTreeSet<String>>;

    /// Close the underlying connection pool
    ///
    /// Calling this more than once is harmless.
    async fn close(&self);
}
