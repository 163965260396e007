use dutylog_rotation::RotationConfig;
use dutylog_tracker::{MySqlConfig, SqliteConfig, StorageConfig, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the binary reads from its config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_sql_queries: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql_queries: false,
        }
    }
}

impl AppConfig {
    /// Load YAML, or TOML when the file ends in `.toml`
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        // Storage selection first, so the connection overrides below land
        // on the selected backend
        if let Ok(val) = std::env::var("DUTYLOG_STORAGE") {
            let is_mysql = matches!(self.tracker.storage, StorageConfig::Mysql(_));
            match val.to_lowercase().as_str() {
                "sqlite" if is_mysql => {
                    self.tracker.storage = StorageConfig::Sqlite(SqliteConfig::default())
                }
                "mysql" if !is_mysql => {
                    self.tracker.storage = StorageConfig::Mysql(MySqlConfig::default())
                }
                "sqlite" | "mysql" => {}
                _ => eprintln!("Warning: Invalid DUTYLOG_STORAGE '{}', ignoring", val),
            }
        }

        match &mut self.tracker.storage {
            StorageConfig::Sqlite(sqlite) => {
                if let Ok(val) = std::env::var("DUTYLOG_SQLITE_PATH") {
                    sqlite.path = val.into();
                }
            }
            StorageConfig::Mysql(mysql) => {
                if let Ok(val) = std::env::var("DUTYLOG_MYSQL_HOST") {
                    mysql.host = val;
                }
                if let Ok(val) = std::env::var("DUTYLOG_MYSQL_PORT")
                    && let Ok(port) = val.parse::<u16>()
                {
                    mysql.port = port;
                }
                if let Ok(val) = std::env::var("DUTYLOG_MYSQL_DATABASE") {
                    mysql.database = val;
                }
                if let Ok(val) = std::env::var("DUTYLOG_MYSQL_USERNAME") {
                    mysql.username = val;
                }
                if let Ok(val) = std::env::var("DUTYLOG_MYSQL_PASSWORD") {
                    mysql.password = val;
                }
            }
        }

        if let Ok(val) = std::env::var("DUTYLOG_ORIGIN") {
            self.tracker.origin.name = val;
        }

        if let Ok(val) = std::env::var("DUTYLOG_TRACK_VOTES")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.tracker.track_votes = enabled;
        }

        if let Ok(val) = std::env::var("DUTYLOG_DEBUG")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.tracker.debug = enabled;
        }

        if let Ok(val) = std::env::var("DUTYLOG_EXPORT_FOLDER") {
            self.rotation.export_folder = val.into();
        }

        // Logging settings
        if let Ok(val) = std::env::var("DUTYLOG_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("DUTYLOG_LOG_SQL_QUERIES")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.logging.log_sql_queries = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.tracker.validate()?;
        self.rotation.validate()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "DUTYLOG_STORAGE",
        "DUTYLOG_SQLITE_PATH",
        "DUTYLOG_MYSQL_HOST",
        "DUTYLOG_MYSQL_PORT",
        "DUTYLOG_TRACK_VOTES",
        "DUTYLOG_LOG_LEVEL",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            // SAFETY: tests touching the environment are #[serial]
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn test_load_flat_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dutylog.yaml");
        std::fs::write(
            &path,
            r#"
storage:
  type: sqlite
  path: staff.db
track_votes: true
rotation:
  enabled: true
  frequency: weekly
  start_day: 1
logging:
  level: debug
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert!(config.tracker.track_votes);
        assert!(config.rotation.enabled);
        assert_eq!(config.rotation.start_day, 1);
        assert_eq!(config.logging.level, "debug");
        match &config.tracker.storage {
            StorageConfig::Sqlite(sqlite) => assert_eq!(sqlite.path, PathBuf::from("staff.db")),
            other => panic!("expected sqlite, got {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dutylog.toml");
        std::fs::write(
            &path,
            r#"
debug = true

[storage]
type = "mysql"
host = "db.internal"

[rotation]
start_day = 40
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert!(config.tracker.debug);
        assert_eq!(config.tracker.storage.kind(), "MySQL");
        assert!(config.validate().unwrap_err().contains("start_day"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        // SAFETY: serialized with every other env test
        unsafe {
            std::env::set_var("DUTYLOG_STORAGE", "mysql");
            std::env::set_var("DUTYLOG_MYSQL_HOST", "10.0.0.5");
            std::env::set_var("DUTYLOG_MYSQL_PORT", "not-a-port");
            std::env::set_var("DUTYLOG_TRACK_VOTES", "true");
            std::env::set_var("DUTYLOG_LOG_LEVEL", "warn");
        }

        let mut config = AppConfig::default();
        config.merge_env();
        clear_env();

        match &config.tracker.storage {
            StorageConfig::Mysql(mysql) => {
                assert_eq!(mysql.host, "10.0.0.5");
                assert_eq!(mysql.port, 3306);
            }
            other => panic!("expected mysql, got {:?}", other),
        }
        assert!(config.tracker.track_votes);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_env_keeps_matching_backend_settings() {
        clear_env();
        let mut config = AppConfig::default();
        if let StorageConfig::Sqlite(sqlite) = &mut config.tracker.storage {
            sqlite.max_connections = 2;
        }

        // SAFETY: serialized with every other env test
        unsafe {
            std::env::set_var("DUTYLOG_STORAGE", "SQLite");
            std::env::set_var("DUTYLOG_SQLITE_PATH", "/data/staff.db");
        }
        config.merge_env();
        clear_env();

        match &config.tracker.storage {
            StorageConfig::Sqlite(sqlite) => {
                assert_eq!(sqlite.max_connections, 2);
                assert_eq!(sqlite.path, PathBuf::from("/data/staff.db"));
            }
            other => panic!("expected sqlite, got {:?}", other),
        }
    }
}
