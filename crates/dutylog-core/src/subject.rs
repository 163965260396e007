//! Subject identity and the persisted record types
//!
//! A subject is a tracked staff member. Its id is stable for its whole
//! lifetime; the display name is whatever the directory last reported.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Origin label used when a row carries no (or a blank) origin.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Stable unique identifier of a tracked subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(Uuid);

impl SubjectId {
    /// Create a new random subject ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a subject ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse a subject ID from its hyphenated string form
    pub fn from_string(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s.trim())
            .map_err(|e| Error::InvalidSubject(format!("{}: {}", s, e)))?;
        Ok(Self(uuid))
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

/// An open tracking interval. At most one exists per subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSession {
    pub subject_id: SubjectId,
    pub display_name: String,
    /// Epoch milliseconds at which the session was opened
    pub started_at_ms: i64,
    pub origin: String,
}

impl OpenSession {
    /// Elapsed milliseconds between the session start and `now_ms`.
    ///
    /// May be zero or negative when the clock moved backwards.
    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.started_at_ms)
    }
}

/// Durable running total for one subject under one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulation {
    pub subject_id: SubjectId,
    pub display_name: String,
    pub total_duration_ms: i64,
    pub origin: String,
}

impl Accumulation {
    /// Origin label with blank values folded into [`UNKNOWN_ORIGIN`]
    pub fn origin_label(&self) -> &str {
        normalize_origin(&self.origin)
    }
}

/// One vote, appended to the ledger and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub subject_id: SubjectId,
    pub display_name: String,
    pub service_name: String,
    /// Canonical `YYYY-MM-DD HH:MM:SS` form where the input allowed it
    pub vote_time: String,
}

/// Fold blank origin labels into [`UNKNOWN_ORIGIN`].
pub fn normalize_origin(origin: &str) -> &str {
    let trimmed = origin.trim();
    if trimmed.is_empty() {
        UNKNOWN_ORIGIN
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_id_creation() {
        let id1 = SubjectId::new();
        let id2 = SubjectId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_subject_id_from_string() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = SubjectId::from_string(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);

        let parsed: SubjectId = uuid_str.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_subject_id_invalid_string() {
        let result = SubjectId::from_string("not-a-uuid");
        assert!(matches!(result, Err(Error::InvalidSubject(_))));
    }

    #[test]
    fn test_elapsed_can_go_negative() {
        let session = OpenSession {
            subject_id: SubjectId::new(),
            display_name: "Alice".to_string(),
            started_at_ms: 5_000,
            origin: "Hub".to_string(),
        };
        assert_eq!(session.elapsed_ms(9_000), 4_000);
        assert_eq!(session.elapsed_ms(4_000), -1_000);
    }

    #[test]
    fn test_normalize_origin() {
        assert_eq!(normalize_origin(""), UNKNOWN_ORIGIN);
        assert_eq!(normalize_origin("   "), UNKNOWN_ORIGIN);
        assert_eq!(normalize_origin(" Hub "), "Hub");

        let acc = Accumulation {
            subject_id: SubjectId::new(),
            display_name: "Alice".to_string(),
            total_duration_ms: 10,
            origin: String::new(),
        };
        assert_eq!(acc.origin_label(), "unknown");
    }
}
