//! Reconciliation of leaked sessions
//!
//! A session leaks when the host stops without closing it (crash, kill,
//! lost disconnect event). The sweep closes every persisted session whose
//! subject is no longer live, which recovers the time up to the sweep.

use dutylog_core::LivenessCheck;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

use crate::handler::StorageHandler;

/// Statistics about one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Open sessions found
    pub sessions_examined: u64,
    /// Sessions whose subject was not live and were closed
    pub sessions_closed: u64,
    /// Duration of the sweep in milliseconds
    pub duration_ms: u64,
}

/// Run one sweep over the handler's open sessions
pub async fn sweep(handler: &StorageHandler, liveness: &dyn LivenessCheck) -> ReconcileStats {
    let start = Instant::now();
    let mut stats = ReconcileStats::default();

    for session in handler.open_sessions().await {
        stats.sessions_examined += 1;
        if liveness.is_live(session.subject_id).await {
            continue;
        }

        tracing::debug!(
            "[{}] Reconciling leaked session for {} (opened at {})",
            handler.kind(),
            session.subject_id,
            session.started_at_ms
        );
        if handler
            .close_if_started_at(session.subject_id, session.started_at_ms)
            .await
        {
            stats.sessions_closed += 1;
        }
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    if stats.sessions_closed > 0 {
        tracing::info!(
            "[{}] Reconciliation closed {} of {} open sessions in {}ms",
            handler.kind(),
            stats.sessions_closed,
            stats.sessions_examined,
            stats.duration_ms
        );
    }

    stats
}

/// Handle for the background reconciliation task
pub struct ReconcileTask {
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReconcileTask {
    /// Signal the task to stop and wait until it has
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!("Reconciliation task ended abnormally: {}", e);
        }
    }
}

/// Spawn a background task that sweeps every `interval`
///
/// The task holds only a weak reference, so it also ends once the handler
/// is dropped.
pub fn spawn_reconcile_task(
    handler: Weak<StorageHandler>,
    liveness: Arc<dyn LivenessCheck>,
    interval: Duration,
) -> ReconcileTask {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        tracing::info!(
            "Starting reconciliation task (interval: {}s)",
            interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Reconciliation task shutting down");
                    break;
                }
                _ = sleep(interval) => {
                    let Some(handler) = handler.upgrade() else {
                        tracing::debug!("Storage handler dropped, stopping reconciliation");
                        break;
                    };
                    // A sweep can stall on a slow directory or liveness lookup
                    tokio::select! {
                        _ = sweep(&handler, liveness.as_ref()) => {}
                        _ = shutdown_rx.recv() => {
                            tracing::info!("Reconciliation task shutting down mid-sweep");
                            break;
                        }
                    }
                }
            }
        }
    });

    ReconcileTask {
        shutdown_tx,
        handle,
    }
}
