//! Collaborators for running without a live host
//!
//! Maintenance commands run while the host is down, so no subject is
//! online and no directory is reachable.

use async_trait::async_trait;
use dutylog_core::{Capability, LivenessCheck, Result, SubjectDirectory, SubjectId};

/// Directory that knows no names and grants every capability
///
/// Accumulations fall back to the name stored with the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineDirectory;

#[async_trait]
impl SubjectDirectory for OfflineDirectory {
    async fn display_name(&self, _subject_id: SubjectId) -> Result<Option<String>> {
        Ok(None)
    }

    async fn has_capability(&self, _subject_id: SubjectId, _capability: Capability) -> Result<bool> {
        Ok(true)
    }
}

/// Liveness check under which every subject is offline
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLiveSubjects;

#[async_trait]
impl LivenessCheck for NoLiveSubjects {
    async fn is_live(&self, _subject_id: SubjectId) -> bool {
        false
    }

    async fn live_subjects(&self) -> Vec<SubjectId> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::StorageHandler;
    use dutylog_core::{ManualClock, OriginResolver};
    use dutylog_storage_sqlite::SqliteBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_offline_sweep_uses_session_name() {
        let clock = Arc::new(ManualClock::new(0));
        let handler = StorageHandler::new(
            Arc::new(SqliteBackend::in_memory().await.unwrap()),
            Arc::new(OfflineDirectory),
            Arc::new(OriginResolver::fixed("Hub")),
            clock.clone(),
        );

        let id = SubjectId::new();
        handler.open_at(id, "Stored Name", 0).await;
        clock.set(7_000);

        let stats = handler.reconcile_once(&NoLiveSubjects).await;
        assert_eq!(stats.sessions_closed, 1);
        assert_eq!(handler.total_duration(id).await, 7_000);
        assert_eq!(
            handler.last_known_name(id).await.as_deref(),
            Some("Stored Name")
        );
    }
}
