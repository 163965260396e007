//! SqliteBackend - StorageBackend trait implementation for an embedded SQLite file

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::migrations;
use dutylog_core::{
    Error, Result,
    backend::StorageBackend,
    subject::{Accumulation, OpenSession, SubjectId, UNKNOWN_ORIGIN, VoteRecord, normalize_origin},
};

/// Origin column folded the same way `normalize_origin` folds labels
const ORIGIN_LABEL_SQL: &str = "COALESCE(NULLIF(TRIM(server_name), ''), 'unknown')";

/// Embedded single-file SQLite backend
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (or create) the database file at `path` and run migrations
    ///
    /// A leading `~` is expanded to the home directory and missing parent
    /// directories are created.
    ///
    /// # Errors
    /// - `Error::Database` if the file cannot be opened
    /// - `Error::Migration` if the schema cannot be brought up to date
    pub async fn new(path: impl Into<PathBuf>, max_connections: u32) -> Result<Self> {
        let path = expand_tilde(path.into())?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::Database(format!("Failed to open SQLite database {:?}: {}", path, e))
            })?;

        info!("[SQLite] Connected to {:?}", path);
        Self::from_pool(pool).await
    }

    /// Private in-memory database, mostly for tests
    ///
    /// Limited to a single connection that never expires, otherwise every
    /// new connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Database(format!("Invalid in-memory options: {}", e)))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and run migrations on it
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn expand_tilde(path: PathBuf) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Internal("Could not determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path),
    }
}

fn db_err(operation: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |e| Error::Database(format!("{} failed: {}", operation, e))
}

fn subject_from_row(row: &SqliteRow) -> Result<SubjectId> {
    let raw: String = row
        .try_get("player_uuid")
        .map_err(|e| Error::Database(format!("Failed to read player_uuid: {}", e)))?;
    SubjectId::from_string(&raw)
}

fn session_from_row(row: &SqliteRow) -> Result<OpenSession> {
    let read = |e: sqlx::Error| Error::Database(format!("Failed to read staff_sessions row: {}", e));
    Ok(OpenSession {
        subject_id: subject_from_row(row)?,
        display_name: row.try_get("player_name").map_err(read)?,
        started_at_ms: row.try_get("join_time").map_err(read)?,
        origin: row
            .try_get::<Option<String>, _>("server_name")
            .map_err(read)?
            .unwrap_or_default(),
    })
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> &'static str {
        "SQLite"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("ping"))?;
        Ok(())
    }

    async fn upsert_session(&self, session: &OpenSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staff_sessions (player_uuid, player_name, join_time, server_name)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (player_uuid) DO UPDATE SET
                player_name = excluded.player_name,
                join_time = excluded.join_time,
                server_name = excluded.server_name
            "#,
        )
        .bind(session.subject_id.to_string())
        .bind(&session.display_name)
        .bind(session.started_at_ms)
        .bind(&session.origin)
        .execute(&self.pool)
        .await
        .map_err(db_err("upsert_session"))?;

        debug!(
            "[SQLite] Session opened for {} at {} ({})",
            session.subject_id, session.started_at_ms, session.origin
        );
        Ok(())
    }

    async fn get_session(&self, subject_id: SubjectId) -> Result<Option<OpenSession>> {
        let row = sqlx::query(
            "SELECT player_uuid, player_name, join_time, server_name FROM staff_sessions WHERE player_uuid = ?",
        )
        .bind(subject_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get_session"))?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn delete_session(&self, subject_id: SubjectId, started_at_ms: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM staff_sessions WHERE player_uuid = ? AND join_time = ?")
                .bind(subject_id.to_string())
                .bind(started_at_ms)
                .execute(&self.pool)
                .await
                .map_err(db_err("delete_session"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self) -> Result<Vec<OpenSession>> {
        let rows = sqlx::query(
            "SELECT player_uuid, player_name, join_time, server_name FROM staff_sessions",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list_sessions"))?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            match session_from_row(row) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("[SQLite] Skipping unreadable session row: {}", e),
            }
        }
        Ok(sessions)
    }

    async fn add_duration(
        &self,
        subject_id: SubjectId,
        display_name: &str,
        origin: &str,
        duration_ms: i64,
    ) -> Result<()> {
        // No conflict target: matches the composite key on fresh installs and
        // the legacy single-column key on upgraded ones.
        sqlx::query(
            r#"
            INSERT INTO staff_time (player_uuid, player_name, total_time, server_name)
            VALUES (?, ?, ?, ?)
            ON CONFLICT DO UPDATE SET
                total_time = staff_time.total_time + excluded.total_time,
                player_name = excluded.player_name,
                server_name = excluded.server_name
            "#,
        )
        .bind(subject_id.to_string())
        .bind(display_name)
        .bind(duration_ms)
        .bind(origin)
        .execute(&self.pool)
        .await
        .map_err(db_err("add_duration"))?;

        debug!(
            "[SQLite] Added {} ms for {} ({}) under '{}'",
            duration_ms, subject_id, display_name, origin
        );
        Ok(())
    }

    async fn accumulations(&self, subject_id: SubjectId) -> Result<Vec<Accumulation>> {
        let rows = sqlx::query(
            r#"
            SELECT player_uuid, player_name, total_time, server_name
            FROM staff_time
            WHERE player_uuid = ?
            ORDER BY server_name
            "#,
        )
        .bind(subject_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("accumulations"))?;

        rows.iter()
            .map(|row| {
                let read =
                    |e: sqlx::Error| Error::Database(format!("Failed to read staff_time row: {}", e));
                Ok(Accumulation {
                    subject_id,
                    display_name: row.try_get("player_name").map_err(read)?,
                    total_duration_ms: row.try_get("total_time").map_err(read)?,
                    origin: row
                        .try_get::<Option<String>, _>("server_name")
                        .map_err(read)?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn tracked_subjects(&self) -> Result<Vec<SubjectId>> {
        let rows = sqlx::query("SELECT DISTINCT player_uuid FROM staff_time")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("tracked_subjects"))?;

        let mut subjects = Vec::with_capacity(rows.len());
        for row in &rows {
            match subject_from_row(row) {
                Ok(id) => subjects.push(id),
                Err(e) => warn!("[SQLite] Skipping staff_time row with bad id: {}", e),
            }
        }
        Ok(subjects)
    }

    async fn insert_vote(&self, vote: &VoteRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO staff_votes (player_uuid, player_name, service_name, vote_time) VALUES (?, ?, ?, ?)",
        )
        .bind(vote.subject_id.to_string())
        .bind(&vote.display_name)
        .bind(&vote.service_name)
        .bind(&vote.vote_time)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert_vote"))?;

        debug!(
            "[SQLite] Vote recorded for {} from {} at {}",
            vote.subject_id, vote.service_name, vote.vote_time
        );
        Ok(())
    }

    async fn count_votes(&self, subject_id: SubjectId) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM staff_votes WHERE player_uuid = ?")
            .bind(subject_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("count_votes"))
    }

    async fn all_votes(&self) -> Result<Vec<VoteRecord>> {
        let rows = sqlx::query(
            "SELECT player_uuid, player_name, service_name, vote_time FROM staff_votes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("all_votes"))?;

        let mut votes = Vec::with_capacity(rows.len());
        for row in &rows {
            let read =
                |e: sqlx::Error| Error::Database(format!("Failed to read staff_votes row: {}", e));
            let subject_id = match subject_from_row(row) {
                Ok(id) => id,
                Err(e) => {
                    warn!("[SQLite] Skipping vote row with bad id: {}", e);
                    continue;
                }
            };
            votes.push(VoteRecord {
                subject_id,
                display_name: row.try_get("player_name").map_err(read)?,
                service_name: row.try_get("service_name").map_err(read)?,
                vote_time: row.try_get("vote_time").map_err(read)?,
            });
        }
        Ok(votes)
    }

    async fn wipe(&self) -> Result<()> {
        sqlx::query("DELETE FROM staff_time")
            .execute(&self.pool)
            .await
            .map_err(db_err("wipe staff_time"))?;
        sqlx::query("DELETE FROM staff_votes")
            .execute(&self.pool)
            .await
            .map_err(db_err("wipe staff_votes"))?;

        info!("[SQLite] Wiped staff_time and staff_votes");
        Ok(())
    }

    async fn rename_origin(&self, old: &str, new: &str) -> Result<u64> {
        let old = normalize_origin(old).to_string();
        let new = new.trim().to_string();
        if new.is_empty() || old == new {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(db_err("rename_origin"))?;

        // Subjects that already have a row under the new label: fold the old total in
        sqlx::query(
            r#"
            UPDATE staff_time
            SET total_time = total_time + (
                SELECT o.total_time FROM staff_time o
                WHERE o.player_uuid = staff_time.player_uuid
                  AND COALESCE(NULLIF(TRIM(o.server_name), ''), 'unknown') = ?
            )
            WHERE server_name = ?
              AND EXISTS (
                SELECT 1 FROM staff_time o
                WHERE o.player_uuid = staff_time.player_uuid
                  AND COALESCE(NULLIF(TRIM(o.server_name), ''), 'unknown') = ?
              )
            "#,
        )
        .bind(&old)
        .bind(&new)
        .bind(&old)
        .execute(&mut *tx)
        .await
        .map_err(db_err("rename_origin merge"))?;

        let merged = sqlx::query(&format!(
            r#"
            DELETE FROM staff_time
            WHERE {label} = ?
              AND EXISTS (
                SELECT 1 FROM staff_time n
                WHERE n.player_uuid = staff_time.player_uuid AND n.server_name = ?
              )
            "#,
            label = ORIGIN_LABEL_SQL
        ))
        .bind(&old)
        .bind(&new)
        .execute(&mut *tx)
        .await
        .map_err(db_err("rename_origin delete merged"))?
        .rows_affected();

        let renamed = sqlx::query(&format!(
            "UPDATE staff_time SET server_name = ? WHERE {} = ?",
            ORIGIN_LABEL_SQL
        ))
        .bind(&new)
        .bind(&old)
        .execute(&mut *tx)
        .await
        .map_err(db_err("rename_origin staff_time"))?
        .rows_affected();

        let sessions = sqlx::query(&format!(
            "UPDATE staff_sessions SET server_name = ? WHERE {} = ?",
            ORIGIN_LABEL_SQL
        ))
        .bind(&new)
        .bind(&old)
        .execute(&mut *tx)
        .await
        .map_err(db_err("rename_origin staff_sessions"))?
        .rows_affected();

        tx.commit().await.map_err(db_err("rename_origin commit"))?;

        let changed = merged + renamed + sessions;
        info!(
            "[SQLite] Renamed origin '{}' to '{}' ({} rows)",
            old, new, changed
        );
        Ok(changed)
    }

    async fn origins(&self) -> Result<BTreeSet<String>> {
        let labels: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT TRIM(server_name) FROM staff_time
            WHERE server_name IS NOT NULL AND TRIM(server_name) <> ''
            UNION
            SELECT DISTINCT TRIM(server_name) FROM staff_sessions
            WHERE server_name IS NOT NULL AND TRIM(server_name) <> ''
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("origins"))?;

        Ok(labels
            .into_iter()
            .filter(|label| label != UNKNOWN_ORIGIN)
            .collect())
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("[SQLite] Connection pool closed");
        }
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn backend() -> SqliteBackend {
        SqliteBackend::in_memory().await.unwrap()
    }

    fn session(id: SubjectId, name: &str, started_at_ms: i64, origin: &str) -> OpenSession {
        OpenSession {
            subject_id: id,
            display_name: name.to_string(),
            started_at_ms,
            origin: origin.to_string(),
        }
    }

    fn vote(id: SubjectId, service: &str) -> VoteRecord {
        VoteRecord {
            subject_id: id,
            display_name: "Alex".to_string(),
            service_name: service.to_string(),
            vote_time: "2024-03-01 12:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_file_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dutylog.db");

        let backend = SqliteBackend::new(&db_path, 2).await.unwrap();
        backend.ping().await.unwrap();
        assert!(db_path.exists());

        let version = migrations::get_current_version(backend.pool()).await.unwrap();
        assert_eq!(version, Some(migrations::MIGRATIONS.len() as i32));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let backend = backend().await;
        migrations::run_migrations(backend.pool()).await.unwrap();
        migrations::run_migrations(backend.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_overwrites_session() {
        let backend = backend().await;
        let id = SubjectId::new();

        backend.upsert_session(&session(id, "Alex", 1_000, "Hub")).await.unwrap();
        backend.upsert_session(&session(id, "Alex2", 9_000, "Survival")).await.unwrap();

        let sessions = backend.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].started_at_ms, 9_000);
        assert_eq!(sessions[0].origin, "Survival");
        assert_eq!(sessions[0].display_name, "Alex2");
    }

    #[tokio::test]
    async fn test_delete_session_requires_matching_start() {
        let backend = backend().await;
        let id = SubjectId::new();
        backend.upsert_session(&session(id, "Alex", 1_000, "Hub")).await.unwrap();

        assert!(!backend.delete_session(id, 999).await.unwrap());
        assert!(backend.get_session(id).await.unwrap().is_some());

        assert!(backend.delete_session(id, 1_000).await.unwrap());
        assert!(backend.get_session(id).await.unwrap().is_none());
        assert!(!backend.delete_session(id, 1_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_duration_accumulates_per_origin() {
        let backend = backend().await;
        let id = SubjectId::new();

        backend.add_duration(id, "Alex", "Hub", 2_000).await.unwrap();
        backend.add_duration(id, "Alex", "Survival", 3_000).await.unwrap();
        backend.add_duration(id, "Alexander", "Hub", 500).await.unwrap();

        let rows = backend.accumulations(id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].origin, "Hub");
        assert_eq!(rows[0].total_duration_ms, 2_500);
        assert_eq!(rows[0].display_name, "Alexander");
        assert_eq!(rows[1].origin, "Survival");
        assert_eq!(rows[1].total_duration_ms, 3_000);

        assert_eq!(backend.tracked_subjects().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_votes_and_wipe() {
        let backend = backend().await;
        let id = SubjectId::new();

        for _ in 0..3 {
            backend.insert_vote(&vote(id, "ServiceX")).await.unwrap();
        }
        backend.add_duration(id, "Alex", "Hub", 1_000).await.unwrap();

        assert_eq!(backend.count_votes(id).await.unwrap(), 3);
        let votes = backend.all_votes().await.unwrap();
        assert_eq!(votes.len(), 3);
        assert!(votes.iter().all(|v| v.service_name == "ServiceX"));

        backend.wipe().await.unwrap();
        assert_eq!(backend.count_votes(id).await.unwrap(), 0);
        assert!(backend.accumulations(id).await.unwrap().is_empty());
        assert!(backend.tracked_subjects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_origin_merges_existing_rows() {
        let backend = backend().await;
        let merged = SubjectId::new();
        let moved = SubjectId::new();

        backend.add_duration(merged, "Alex", "Lobby", 1_000).await.unwrap();
        backend.add_duration(merged, "Alex", "Hub", 2_000).await.unwrap();
        backend.add_duration(moved, "Sam", "Lobby", 4_000).await.unwrap();
        backend.upsert_session(&session(moved, "Sam", 10, "Lobby")).await.unwrap();

        let changed = backend.rename_origin("Lobby", "Hub").await.unwrap();
        assert_eq!(changed, 3);

        let rows = backend.accumulations(merged).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].origin, "Hub");
        assert_eq!(rows[0].total_duration_ms, 3_000);

        let rows = backend.accumulations(moved).await.unwrap();
        assert_eq!(rows[0].origin, "Hub");
        assert_eq!(rows[0].total_duration_ms, 4_000);
        assert_eq!(backend.get_session(moved).await.unwrap().unwrap().origin, "Hub");

        let origins = backend.origins().await.unwrap();
        assert_eq!(origins.into_iter().collect::<Vec<_>>(), vec!["Hub".to_string()]);
    }

    #[tokio::test]
    async fn test_rename_unknown_origin_claims_blank_rows() {
        let backend = backend().await;
        let id = SubjectId::new();
        backend.add_duration(id, "Alex", "", 1_000).await.unwrap();

        assert!(backend.origins().await.unwrap().is_empty());
        assert_eq!(backend.rename_origin("unknown", "Survival").await.unwrap(), 1);
        assert_eq!(backend.accumulations(id).await.unwrap()[0].origin, "Survival");
        assert_eq!(backend.rename_origin("Survival", "Survival").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_legacy_table_gets_origin_column() {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE staff_time (player_uuid TEXT PRIMARY KEY, player_name TEXT NOT NULL, total_time INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let id = SubjectId::new();
        sqlx::query("INSERT INTO staff_time VALUES (?, 'Alex', 5000)")
            .bind(id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let backend = SqliteBackend::from_pool(pool).await.unwrap();
        assert!(
            migrations::column_exists(backend.pool(), "staff_time", "server_name")
                .await
                .unwrap()
        );

        let rows = backend.accumulations(id).await.unwrap();
        assert_eq!(rows[0].total_duration_ms, 5_000);
        assert_eq!(rows[0].origin_label(), "unknown");

        // Legacy key is the subject alone: the origin becomes last-writer
        backend.add_duration(id, "Alex", "Hub", 1_000).await.unwrap();
        let rows = backend.accumulations(id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_duration_ms, 6_000);
        assert_eq!(rows[0].origin, "Hub");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = backend().await;
        backend.close().await;
        backend.close().await;
        assert!(backend.ping().await.is_err());
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        let path = PathBuf::from("data/dutylog.db");
        assert_eq!(expand_tilde(path.clone()).unwrap(), path);
    }
}
