//! Dutylog Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout Dutylog:
//! - Subject identity and persisted record types
//! - The storage backend trait
//! - Subject directory and liveness collaborators
//! - Origin label resolution
//! - Clock abstraction and vote timestamp normalization

pub mod backend;
pub mod clock;
pub mod directory;
pub mod error;
pub mod origin;
pub mod subject;
pub mod timestamp;

pub use backend::StorageBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{Capability, LivenessCheck, SubjectDirectory};
pub use error::{Error, Result};
pub use origin::{OriginConfig, OriginDetection, OriginResolver};
pub use subject::{Accumulation, OpenSession, SubjectId, UNKNOWN_ORIGIN, VoteRecord};
