//! Storage backend factory
//!
//! Factory functions to create the storage backend and handler selected by
//! configuration.

use dutylog_core::{
    Clock, Error, OriginResolver, Result, StorageBackend, SubjectDirectory,
};
use std::sync::Arc;

use crate::config::{StorageConfig, TrackerConfig};
use crate::handler::StorageHandler;

/// Create the storage backend selected by `config`
///
/// # Errors
/// - `Error::Config` if MySQL is selected but support is not compiled in
/// - `Error::Database` / `Error::Migration` if the backend cannot be opened
pub async fn create_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Sqlite(sqlite) => {
            tracing::info!("Initializing SQLite storage backend (db={:?})", sqlite.path);
            let backend = dutylog_storage_sqlite::SqliteBackend::new(
                sqlite.path.clone(),
                sqlite.max_connections,
            )
            .await?;
            Ok(Arc::new(backend))
        }

        #[cfg(feature = "mysql")]
        StorageConfig::Mysql(mysql) => {
            tracing::info!(
                "Initializing MySQL storage backend ({}@{}:{}/{})",
                mysql.username,
                mysql.host,
                mysql.port,
                mysql.database
            );

            let pool_config = dutylog_storage_mysql::MySqlBackendConfig::default()
                .with_max_connections(mysql.max_connections)
                .with_min_connections(mysql.min_connections)
                .with_acquire_timeout(std::time::Duration::from_secs(
                    mysql.acquire_timeout_seconds,
                ))
                .with_idle_timeout(std::time::Duration::from_secs(mysql.idle_timeout_seconds))
                .with_max_lifetime(std::time::Duration::from_secs(mysql.max_lifetime_seconds));

            let options = dutylog_storage_mysql::MySqlConnectOptions::new()
                .host(&mysql.host)
                .port(mysql.port)
                .database(&mysql.database)
                .username(&mysql.username)
                .password(&mysql.password);

            let backend = dutylog_storage_mysql::MySqlBackend::connect(options, pool_config).await?;
            Ok(Arc::new(backend))
        }

        #[cfg(not(feature = "mysql"))]
        StorageConfig::Mysql(_) => Err(Error::Config(
            "MySQL storage selected but this build lacks the `mysql` feature".to_string(),
        )),
    }
}

/// Validate `config` and build a handler over the selected backend
///
/// The origin resolver is reconfigured from `config.origin`.
pub async fn create_handler(
    config: &TrackerConfig,
    directory: Arc<dyn SubjectDirectory>,
    origin: Arc<OriginResolver>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<StorageHandler>> {
    config.validate().map_err(Error::Config)?;

    let backend = create_backend(&config.storage).await?;
    origin.reconfigure(config.origin.clone());

    Ok(Arc::new(StorageHandler::new(
        backend, directory, origin, clock,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqliteConfig;
    use crate::offline::OfflineDirectory;
    use dutylog_core::{OriginConfig, OriginDetection, SubjectId, SystemClock};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_sqlite_handler() {
        let temp_dir = TempDir::new().unwrap();
        let config = TrackerConfig {
            storage: StorageConfig::Sqlite(SqliteConfig {
                path: temp_dir.path().join("dutylog.db"),
                max_connections: 2,
            }),
            origin: OriginConfig {
                name: "Hub".to_string(),
                detection: OriginDetection::Config,
            },
            ..Default::default()
        };

        let origin = Arc::new(OriginResolver::fixed("placeholder"));
        let handler = create_handler(
            &config,
            Arc::new(OfflineDirectory),
            origin.clone(),
            Arc::new(SystemClock),
        )
        .await
        .unwrap();

        assert_eq!(handler.kind(), "SQLite");
        assert!(handler.is_available().await);
        assert_eq!(origin.resolve(), "Hub");

        let id = SubjectId::new();
        handler.open_at(id, "Alex", 0).await;
        assert_eq!(handler.open_sessions().await[0].origin, "Hub");
        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = TrackerConfig::default();
        config.shutdown_timeout_seconds = 0;

        let result = create_handler(
            &config,
            Arc::new(OfflineDirectory),
            Arc::new(OriginResolver::fixed("Hub")),
            Arc::new(SystemClock),
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
