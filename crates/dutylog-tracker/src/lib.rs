//! Session tracking over a pluggable storage backend
//!
//! [`StorageHandler`] is the error boundary over a [`dutylog_core::StorageBackend`].
//! [`SessionTracker`] sits on top and turns host events into sessions,
//! votes and reconciliation sweeps.

pub mod config;
pub mod factory;
pub mod handler;
pub mod offline;
pub mod reconcile;
pub mod switch;
pub mod tracker;

pub use config::{MySqlConfig, ReconciliationConfig, SqliteConfig, StorageConfig, TrackerConfig};
pub use factory::{create_backend, create_handler};
pub use handler::StorageHandler;
pub use offline::{NoLiveSubjects, OfflineDirectory};
pub use reconcile::ReconcileStats;
pub use switch::HandlerSwitch;
pub use tracker::SessionTracker;
