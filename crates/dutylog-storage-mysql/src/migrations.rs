//! Database migration system for the MySQL backend
//!
//! MySQL runs one statement per query, so every migration holds exactly one.

use dutylog_core::{Error, Result};
use sqlx::MySqlPool;
use tracing::{debug, info};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique version number (must be sequential)
    pub version: i32,
    /// Description of what this migration does
    pub description: &'static str,
    /// Single SQL statement to execute for this migration
    pub up_sql: &'static str,
    /// `(table, index)` created by `up_sql`; the statement is skipped when it already exists
    pub creates_index: Option<(&'static str, &'static str)>,
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
                player_uuid VARCHAR(36) NOT NULL,
                player_name VARCHAR(32) NOT NULL,
                total_time BIGINT NOT NULL DEFAULT 0,
                server_name VARCHAR(64) NOT NULL DEFAULT '',
                PRIMARY KEY (player_uuid, server_name)
            )
        "#,
        creates_index: None,
    },
    Migration {
        version: 2,
        description: "Create staff_sessions table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS staff_sessions (
                player_uuid VARCHAR(36) PRIMARY KEY,
                player_name VARCHAR(32) NOT NULL,
                join_time BIGINT NOT NULL,
                server_name VARCHAR(64) NOT NULL DEFAULT ''
            )
        "#,
        creates_index: None,
    },
    Migration {
        version: 3,
        description: "Create staff_votes table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS staff_votes (
                id INT AUTO_INCREMENT PRIMARY KEY,
                player_uuid VARCHAR(36) NOT NULL,
                player_name VARCHAR(32) NOT NULL,
                service_name VARCHAR(64) NOT NULL,
                vote_time DATETIME NOT NULL
            )
        "#,
        creates_index: None,
    },
    Migration {
        version: 4,
        description: "Create staff_votes index",
        up_sql: "CREATE INDEX idx_staff_votes_player ON staff_votes(player_uuid)",
        creates_index: Some(("staff_votes", "idx_staff_votes_player")),
    },
];

/// Additive column checks run after the versioned migrations
pub const COLUMN_ADDITIONS: &[ColumnAddition] = &[
    ColumnAddition {
        table: "staff_time",
        column: "server_name",
        definition: "VARCHAR(64) NOT NULL DEFAULT ''",
    },
    ColumnAddition {
        table: "staff_sessions",
        column: "server_name",
        definition: "VARCHAR(64) NOT NULL DEFAULT ''",
    },
];

/// Run all pending migrations, then the additive column checks
pub async fn run_migrations(pool: &MySqlPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INT PRIMARY KEY,
            description VARCHAR(255) NOT NULL,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
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
        "[MySQL] Found {} applied migrations: {:?}",
        applied_versions.len(),
        applied_versions
    );

    for migration in MIGRATIONS {
        if applied_versions.contains(&migration.version) {
            continue;
        }

        info!(
            "[MySQL] Applying migration {}: {}",
            migration.version, migration.description
        );

        // MySQL has no CREATE INDEX IF NOT EXISTS; a crash before the
        // version row is written leaves the index behind
        let already_applied = match migration.creates_index {
            Some((table, index)) => index_exists(pool, table, index).await?,
            None => false,
        };
        if already_applied {
            debug!(
                "[MySQL] Migration {} already in place, recording it",
                migration.version
            );
        } else {
            sqlx::query(migration.up_sql)
                .execute(pool)
                .await
                .map_err(|e| {
                    Error::Migration(format!(
                        "Failed to apply migration {}: {}",
                        migration.version, e
                    ))
                })?;
        }

        sqlx::query("INSERT IGNORE INTO schema_migrations (version, description) VALUES (?, ?)")
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
pub async fn ensure_column(pool: &MySqlPool, addition: &ColumnAddition) -> Result<bool> {
    if column_exists(pool, addition.table, addition.column).await? {
        return Ok(false);
    }

    info!(
        "[MySQL] Adding missing column {}.{}",
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

pub async fn column_exists(pool: &MySqlPool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM information_schema.columns
        WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?
        "#,
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await
    .map_err(|e| Error::Migration(format!("Failed to inspect table {}: {}", table, e)))?;

    Ok(count > 0)
}

pub async fn index_exists(pool: &MySqlPool, table: &str, index: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM information_schema.statistics
        WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?
        "#,
    )
    .bind(table)
    .bind(index)
    .fetch_one(pool)
    .await
    .map_err(|e| Error::Migration(format!("Failed to inspect indexes of {}: {}", table, e)))?;

    Ok(count > 0)
}

/// Get the current schema version
pub async fn get_current_version(pool: &MySqlPool) -> Result<Option<i32>> {
    let table_exists: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM information_schema.tables
        WHERE table_schema = DATABASE() AND table_name = 'schema_migrations'
        "#,
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
    fn test_migrations_are_single_statements() {
        for migration in MIGRATIONS {
            let statements = migration
                .up_sql
                .split(';')
                .filter(|s| !s.trim().is_empty())
                .count();
            assert_eq!(
                statements, 1,
                "Migration {} must hold exactly one statement",
                migration.version
            );
        }
    }

    #[test]
    fn test_index_migrations_declare_their_index() {
        for migration in MIGRATIONS {
            let creates_index = migration.up_sql.trim_start().starts_with("CREATE INDEX");
            assert_eq!(
                creates_index,
                migration.creates_index.is_some(),
                "Migration {} must name the index it creates",
                migration.version
            );
            if let Some((table, index)) = migration.creates_index {
                assert!(migration.up_sql.contains(table));
                assert!(migration.up_sql.contains(index));
            }
        }
    }

    #[test]
    fn test_column_additions_are_additive() {
        for addition in COLUMN_ADDITIONS {
            assert!(addition.definition.contains("DEFAULT"));
        }
    }
}
