//! Hot replacement of the storage handler on reload

use dutylog_core::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::handler::StorageHandler;

/// Holds the active handler and swaps it without overlap
///
/// The write lock is held across the whole replacement, so callers never
/// observe two handlers against the same database.
pub struct HandlerSwitch {
    current: RwLock<Arc<StorageHandler>>,
}

impl HandlerSwitch {
    pub fn new(handler: Arc<StorageHandler>) -> Self {
        Self {
            current: RwLock::new(handler),
        }
    }

    /// The active handler
    pub async fn current(&self) -> Arc<StorageHandler> {
        self.current.read().await.clone()
    }

    /// Shut the active handler down, then install the one `build` produces
    ///
    /// If `build` fails the stopped handler stays installed and operations
    /// return defaults until a later replacement succeeds.
    pub async fn replace<F, Fut>(&self, build: F) -> Result<Arc<StorageHandler>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<StorageHandler>>>,
    {
        let mut current = self.current.write().await;
        let old_kind = current.kind();
        current.shutdown().await;

        let next = build().await?;
        info!(
            "Storage handler switched from {} to {}",
            old_kind,
            next.kind()
        );
        *current = next.clone();
        Ok(next)
    }
}
