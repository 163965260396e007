//! Tracker configuration

use dutylog_core::OriginConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Periodic sweep for leaked sessions
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    /// Deadline for flushing live sessions on shutdown
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,

    /// Record votes from vote services
    #[serde(default)]
    pub track_votes: bool,

    /// Verbose per-operation logging
    #[serde(default)]
    pub debug: bool,

    /// Origin label of this instance
    #[serde(default)]
    pub origin: OriginConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
            track_votes: false,
            debug: false,
            origin: OriginConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Validate the tracker configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.shutdown_timeout_seconds == 0 {
            return Err("shutdown_timeout_seconds must be at least 1".to_string());
        }
        self.reconciliation.validate()?;
        self.storage.validate()
    }
}

/// Which backend to use, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Sqlite(SqliteConfig),
    Mysql(MySqlConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite(SqliteConfig::default())
    }
}

impl StorageConfig {
    /// Backend tag as used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Sqlite(_) => "SQLite",
            StorageConfig::Mysql(_) => "MySQL",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Sqlite(sqlite) => {
                if sqlite.path.as_os_str().is_empty() {
                    return Err("storage.path must not be empty".to_string());
                }
                if sqlite.max_connections == 0 {
                    return Err("storage.max_connections must be at least 1".to_string());
                }
                Ok(())
            }
            StorageConfig::Mysql(mysql) => mysql.validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the database file
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,

    /// Maximum database connections
    #[serde(default = "default_sqlite_max_connections")]
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
            max_connections: default_sqlite_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MySqlConfig {
    #[serde(default = "default_mysql_host")]
    pub host: String,

    #[serde(default = "default_mysql_port")]
    pub port: u16,

    #[serde(default = "default_mysql_database")]
    pub database: String,

    #[serde(default = "default_mysql_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_mysql_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_mysql_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,

    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,

    #[serde(default = "default_max_lifetime_seconds")]
    pub max_lifetime_seconds: u64,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: default_mysql_host(),
            port: default_mysql_port(),
            database: default_mysql_database(),
            username: default_mysql_username(),
            password: String::new(),
            max_connections: default_mysql_max_connections(),
            min_connections: default_mysql_min_connections(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            max_lifetime_seconds: default_max_lifetime_seconds(),
        }
    }
}

impl MySqlConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("storage.host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("storage.port must be between 1 and 65535".to_string());
        }
        if self.database.trim().is_empty() {
            return Err("storage.database must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("storage.max_connections must be at least 1".to_string());
        }
        if self.min_connections > self.max_connections {
            return Err(
                "storage.min_connections must not exceed storage.max_connections".to_string(),
            );
        }
        if self.acquire_timeout_seconds == 0 {
            return Err("storage.acquire_timeout_seconds must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_reconcile_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_reconcile_interval_seconds(),
        }
    }
}

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.interval_seconds == 0 {
            return Err("reconciliation.interval_seconds must be at least 1".to_string());
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_shutdown_timeout_seconds() -> u64 {
    5
}

fn default_reconcile_interval_seconds() -> u64 {
    60
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("dutylog.db")
}

fn default_sqlite_max_connections() -> u32 {
    5
}

fn default_mysql_host() -> String {
    "localhost".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_mysql_database() -> String {
    "dutylog".to_string()
}

fn default_mysql_username() -> String {
    "root".to_string()
}

fn default_mysql_max_connections() -> u32 {
    10
}

fn default_mysql_min_connections() -> u32 {
    1
}

fn default_acquire_timeout_seconds() -> u64 {
    5
}

fn default_idle_timeout_seconds() -> u64 {
    600
}

fn default_max_lifetime_seconds() -> u64 {
    1800
}

#[cfg(test)]
mod tests {
    use super::*;
    use dutylog_core::OriginDetection;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert!(matches!(config.storage, StorageConfig::Sqlite(_)));
        assert!(config.reconciliation.enabled);
        assert_eq!(config.reconciliation.interval(), Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert!(!config.track_votes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_mysql_yaml() {
        let yaml = r#"
storage:
  type: mysql
  host: db.internal
  database: staff
  password: hunter2
track_votes: true
origin:
  name: auto
  detection: executable
"#;
        let config: TrackerConfig = serde_yaml::from_str(yaml).unwrap();
        match &config.storage {
            StorageConfig::Mysql(mysql) => {
                assert_eq!(mysql.host, "db.internal");
                assert_eq!(mysql.port, 3306);
                assert_eq!(mysql.database, "staff");
                assert_eq!(mysql.max_connections, 10);
            }
            other => panic!("expected mysql, got {:?}", other),
        }
        assert_eq!(config.storage.kind(), "MySQL");
        assert!(config.track_votes);
        assert_eq!(config.origin.detection, OriginDetection::Executable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sqlite_toml() {
        let toml = r#"
shutdown_timeout_seconds = 3

[storage]
type = "sqlite"
path = "/var/lib/dutylog/dutylog.db"

[reconciliation]
interval_seconds = 30
"#;
        let config: TrackerConfig = toml::from_str(toml).unwrap();
        match &config.storage {
            StorageConfig::Sqlite(sqlite) => {
                assert_eq!(sqlite.path, PathBuf::from("/var/lib/dutylog/dutylog.db"));
                assert_eq!(sqlite.max_connections, 5);
            }
            other => panic!("expected sqlite, got {:?}", other),
        }
        assert_eq!(config.reconciliation.interval_seconds, 30);
        assert_eq!(config.shutdown_timeout_seconds, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TrackerConfig::default();
        config.reconciliation.interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.shutdown_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let config = TrackerConfig {
            storage: StorageConfig::Mysql(MySqlConfig {
                min_connections: 20,
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("min_connections"));

        let config = TrackerConfig {
            storage: StorageConfig::Mysql(MySqlConfig {
                host: " ".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_reconciliation_skips_interval_check() {
        let mut config = TrackerConfig::default();
        config.reconciliation.enabled = false;
        config.reconciliation.interval_seconds = 0;
        assert!(config.validate().is_ok());
    }
}
