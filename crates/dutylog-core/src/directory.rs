//! External collaborators consumed by the tracker and the rotation job
//!
//! Neither trait is implemented here. The host provides them: typically a
//! permissions provider for [`SubjectDirectory`] and the game server's
//! online list for [`LivenessCheck`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, subject::SubjectId};

/// Capability checked against the subject directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Subject's online time is tracked
    TrackTime,
    /// Subject's votes are recorded
    TrackVotes,
}

impl Capability {
    /// Permission node conventionally backing this capability
    pub fn permission_node(&self) -> &'static str {
        match self {
            Capability::TrackTime => "dutylog.tracktime",
            Capability::TrackVotes => "dutylog.trackvote",
        }
    }
}

/// Lookup of display names and capabilities.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Current display name, `None` when the subject is unknown to the directory
    async fn display_name(&self, subject_id: SubjectId) -> Result<Option<String>>;

    /// Whether the subject holds `capability`
    async fn has_capability(&self, subject_id: SubjectId, capability: Capability) -> Result<bool>;
}

/// Whether a subject is currently online.
#[async_trait]
pub trait LivenessCheck: Send + Sync {
    async fn is_live(&self, subject_id: SubjectId) -> bool;

    /// Every subject that is online right now
    async fn live_subjects(&self) -> Vec<SubjectId>;
}
