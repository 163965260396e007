//! Pool settings for the MySQL backend
//!
//! MySQL drops connections that sit idle longer than the server's
//! `wait_timeout`. A pool that keeps connections around longer hands out
//! dead ones, so the lifetimes are fitted under that limit at connect time.

use dutylog_core::{Error, Result};
use std::time::Duration;

/// Headroom kept below `wait_timeout`, at most this much
const MAX_WAIT_TIMEOUT_MARGIN: Duration = Duration::from_secs(60);

/// Connection pool settings
///
/// ```
/// use dutylog_storage_mysql::MySqlBackendConfig;
/// use std::time::Duration;
///
/// let config = MySqlBackendConfig::default()
///     .with_max_connections(4)
///     .with_acquire_timeout(Duration::from_secs(3));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlBackendConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    /// Kept below the server's `wait_timeout`
    pub idle_timeout: Duration,
    /// Kept below the server's `wait_timeout`
    pub max_lifetime: Duration,
}

impl Default for MySqlBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl MySqlBackendConfig {
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config(
                "MySQL pool needs at least one connection".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Config(format!(
                "MySQL pool min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::Config(
                "MySQL pool acquire timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest a pooled connection may live or idle under `wait_timeout`
    pub fn lifetime_limit(wait_timeout: Duration) -> Duration {
        let margin = (wait_timeout / 10).min(MAX_WAIT_TIMEOUT_MARGIN);
        let limit = wait_timeout.saturating_sub(margin);
        if limit.is_zero() { wait_timeout } else { limit }
    }

    /// Clamp idle and total lifetimes below the server's `wait_timeout`
    ///
    /// Returns the adjusted config and whether anything changed.
    pub fn fit_to_wait_timeout(mut self, wait_timeout: Duration) -> (Self, bool) {
        if wait_timeout.is_zero() {
            return (self, false);
        }
        let limit = Self::lifetime_limit(wait_timeout);
        let mut changed = false;
        if self.idle_timeout > limit {
            self.idle_timeout = limit;
            changed = true;
        }
        if self.max_lifetime > limit {
            self.max_lifetime = limit;
            changed = true;
        }
        (self, changed)
    }
}
