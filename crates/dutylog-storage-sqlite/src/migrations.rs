//! Database migration system for the SQLite backend
//!
//! Versioned migrations create the tables once. Column additions that older
//! installs lack are applied afterwards by detect-then-alter checks, so a
//! database created before migrations were tracked is upgraded in place.

use dutylog_core::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique version number (must be sequential)
    pub version: i32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to execute for this migration
    pub up_sql: &'static str,
}

/// Column that may be missing on databases created by older releases
#[derive(Debug, Clone)]
pub struct ColumnAddition {
    pub table: &'static str,
    pub column: &'static str,
    pub definition: &'static str,
}

/// All migrations in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create staff_time table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS staff_time (
                player_uuid TEXT NOT NULL,
                player_name TEXT NOT NULL,
                total_time INTEGER NOT NULL DEFAULT 0,
                server_name TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (player_uuid, server_name)
            )
        "#,
    },
    Migration {
        version: 2,
        description: "Create staff_sessions table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS staff_sessions (
                player_uuid TEXT PRIMARY KEY,
                player_name TEXT NOT NULL,
                join_time INTEGER NOT NULL,
                server_name TEXT NOT NULL DEFAULT ''
            )
        "#,
    },
    Migration {
        version: 3,
        description: "Create staff_votes table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS staff_votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_uuid TEXT NOT NULL,
                player_name TEXT NOT NULL,
                service_name TEXT NOT NULL,
                vote_time TEXT NOT NULL
            )
        "#,
    },
    Migration {
        version: 4,
        description: "Create staff_votes index",
        up_sql: r#"
            CREATE INDEX IF NOT EXISTS idx_staff_votes_player
            ON staff_votes(player_uuid)
        "#,
    },
];

/// Additive column checks run after the versioned migrations
pub const COLUMN_ADDITIONS: &[ColumnAddition] = &[
    ColumnAddition {
        table: "staff_time",
        column: "server_name",
        definition: "TEXT NOT NULL DEFAULT ''",
    },
    ColumnAddition {
        table: "staff_sessions",
        column: "server_name",
        definition: "TEXT NOT NULL DEFAULT ''",
    },
];

/// Run all pending migrations, then the additive column checks
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Migration(format!("Failed to create schema_migrations table: {}", e)))?;

    let applied_versions: Vec<i32> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Migration(format!("Failed to fetch applied migrations: {}", e)))?;

    debug!(
        "[SQLite] Found {} applied migrations: {:?}",
        applied_versions.len(),
        applied_versions
    );

    for migration in MIGRATIONS {
        if applied_versions.contains(&migration.version) {
            continue;
        }

        info!(
            "[SQLite] Applying migration {}: {}",
            migration.version, migration.description
        );

        sqlx::query(migration.up_sql)
            .execute(pool)
            .await
            .map_err(|e| {
                Error::Migration(format!(
                    "Failed to apply migration {}: {}",
                    migration.version, e
                ))
            })?;

        sqlx::query(
            "INSERT INTO schema_migrations (version, description) VALUES (?, ?)
                ON CONFLICT (version) DO NOTHING",
        )
        .bind(migration.version)
        .bind(migration.description)
        .execute(pool)
        .await
        .map_err(|e| {
            Error::Migration(format!(
                "Failed to record migration {}: {}",
                migration.version, e
            ))
        })?;
    }

    for addition in COLUMN_ADDITIONS {
        ensure_column(pool, addition).await?;
    }

    Ok(())
}

/// Add `addition.column` when the table does not have it yet
pub async fn ensure_column(pool: &SqlitePool, addition: &ColumnAddition) -> Result<bool> {
    if column_exists(pool, addition.table, addition.column).await? {
        return Ok(false);
    }

    info!(
        "[SQLite] Adding missing column {}.{}",
        addition.table, addition.column
    );

    // Identifiers cannot be bound; both come from COLUMN_ADDITIONS
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        addition.table, addition.column, addition.definition
    );
    sqlx::query(&sql).execute(pool).await.map_err(|e| {
        Error::Migration(format!(
            "Failed to add column {}.{}: {}",
            addition.table, addition.column, e
        ))
    })?;

    Ok(true)
}

pub async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await
            .map_err(|e| {
                Error::Migration(format!("Failed to inspect table {}: {}", table, e))
            })?;
    Ok(count > 0)
}

/// Get the current schema version
pub async fn get_current_version(pool: &SqlitePool) -> Result<Option<i32>> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| Error::Migration(format!("Failed to check for schema_migrations table: {}", e)))?;

    if table_exists == 0 {
        return Ok(None);
    }

    let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Migration(format!("Failed to get current schema version: {}", e)))?;

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_sequential() {
        let mut expected_version = 1;
        for migration in MIGRATIONS {
            assert_eq!(
                migration.version, expected_version,
                "Migration versions must be sequential"
            );
            expected_version += 1;
        }
    }

    #[test]
    fn test_migrations_have_descriptions() {
        for migration in MIGRATIONS {
            assert!(
                !migration.description.is_empty(),
                "Migration {} must have a description",
                migration.version
            );
        }
    }

    #[test]
    fn test_column_additions_are_additive() {
        for addition in COLUMN_ADDITIONS {
            assert!(
                addition.definition.contains("DEFAULT"),
                "{}.{} must carry a default so existing rows stay valid",
                addition.table,
                addition.column
            );
        }
    }
}
