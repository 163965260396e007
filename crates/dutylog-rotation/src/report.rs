//! Plain-text activity reports

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Format the file-name timestamp, e.g. `03_01_2024_12_30`
pub const FILE_STAMP_FORMAT: &str = "%m_%d_%Y_%H_%M";

const GENERATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One subject's line in a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectReport {
    pub display_name: String,
    pub total_duration_ms: i64,
    /// `None` when votes are not reported for this subject
    pub votes: Option<i32>,
    pub by_origin: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Scheduled rotation, marked as such below the header
    Rotation,
    /// Operator-triggered export
    Manual,
}

impl ReportKind {
    /// Default file name prefix
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ReportKind::Rotation => "rotation_export",
            ReportKind::Manual => "staff_activity",
        }
    }
}

/// Format milliseconds as `Xd Yh Zm Ws`, omitting zero components
///
/// Sub-second remainders are dropped; anything under a second is `0s`.
pub fn format_duration(duration_ms: i64) -> String {
    let total_seconds = duration_ms.max(0) / 1000;
    let days = total_seconds / 86_400;
    let hours = total_seconds % 86_400 / 3_600;
    let minutes = total_seconds % 3_600 / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

/// `<name> has a total time of <time>[ and has N votes].` plus a breakdown
/// line per origin when the subject was seen under more than one
pub fn render_subject(subject: &SubjectReport) -> String {
    let mut line = format!(
        "{} has a total time of {}",
        subject.display_name,
        format_duration(subject.total_duration_ms)
    );
    if let Some(votes) = subject.votes {
        let _ = write!(line, " and has {} votes", votes);
    }
    line.push_str(".\n");

    if subject.by_origin.len() > 1 {
        for (origin, duration) in &subject.by_origin {
            let _ = writeln!(line, "  - {}: {}", origin, format_duration(*duration));
        }
    }
    line
}

/// Render a whole report; subjects are listed by display name
pub fn render_report(
    header: &[String],
    kind: ReportKind,
    generated_at: DateTime<Local>,
    subjects: &[SubjectReport],
) -> String {
    let mut out = String::new();
    for line in header {
        out.push_str(line);
        out.push('\n');
    }

    if kind == ReportKind::Rotation {
        out.push_str("# Automatic Rotation Export\n");
        let _ = writeln!(out, "# Generated: {}", generated_at.format(GENERATED_FORMAT));
        out.push('\n');
    }

    let mut sorted: Vec<&SubjectReport> = subjects.iter().collect();
    sorted.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
    });
    for subject in sorted {
        out.push_str(&render_subject(subject));
    }
    out
}

/// `<prefix>_<MM_dd_yyyy_HH_mm>.yml`
pub fn report_file_name(prefix: &str, generated_at: DateTime<Local>) -> String {
    format!("{}_{}.yml", prefix, generated_at.format(FILE_STAMP_FORMAT))
}
