//! Periodic rotation: export tracked totals, then optionally start over

pub mod cadence;
pub mod config;
pub mod report;
pub mod scheduler;
pub mod sink;

pub use cadence::Frequency;
pub use config::RotationConfig;
pub use report::{ReportKind, SubjectReport, format_duration};
pub use scheduler::{Delivery, ExportOutcome, RotationScheduler};
pub use sink::{ExportSink, FileSink};
