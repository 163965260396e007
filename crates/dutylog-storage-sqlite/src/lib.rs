//! SQLite storage backend for single-server Dutylog deployments
//!
//! This crate implements the `StorageBackend` trait on an embedded SQLite
//! file using sqlx.
//!
//! # Features
//! - WAL journal for concurrent readers during writes
//! - Versioned migrations plus additive column checks for older databases
//! - Private in-memory databases for tests
//!
//! # Example
//! ```no_run
//! # use dutylog_storage_sqlite::SqliteBackend;
//! # use dutylog_core::StorageBackend;
//! # async fn example() -> dutylog_core::Result<()> {
//! let backend = SqliteBackend::new("~/.dutylog/dutylog.db", 5).await?;
//! backend.ping().await?;
//! # Ok(())
//! # }
//! ```

pub mod migrations;
mod sqlite_backend;

pub use sqlite_backend::SqliteBackend;
