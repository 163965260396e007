//! Rotation configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::cadence::Frequency;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub frequency: Frequency,

    /// Day of month or day of week, depending on `frequency`
    #[serde(default = "default_start_day")]
    pub start_day: u32,

    /// Wipe totals and votes after a delivered rotation
    #[serde(default = "default_true")]
    pub clean_after_export: bool,

    /// Keep the staged report in `export_folder`
    #[serde(default = "default_true")]
    pub save_local: bool,

    #[serde(default = "default_export_folder")]
    pub export_folder: PathBuf,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Lines written at the top of every report
    #[serde(default)]
    pub header: Vec<String>,

    /// Subjects resolved concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::default(),
            start_day: default_start_day(),
            clean_after_export: true,
            save_local: true,
            export_folder: default_export_folder(),
            file_prefix: default_file_prefix(),
            header: Vec::new(),
            batch_size: default_batch_size(),
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

impl RotationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Validate the rotation configuration
    pub fn validate(&self) -> Result<(), String> {
        let max = self.frequency.max_start_day();
        if self.start_day < 1 || self.start_day > max {
            return Err(format!(
                "rotation.start_day must be between 1 and {} for {:?} rotation",
                max, self.frequency
            ));
        }
        if self.batch_size == 0 {
            return Err("rotation.batch_size must be at least 1".to_string());
        }
        if self.poll_interval_seconds == 0 {
            return Err("rotation.poll_interval_seconds must be at least 1".to_string());
        }
        if self.file_prefix.trim().is_empty() {
            return Err("rotation.file_prefix must not be empty".to_string());
        }
        if self.file_prefix.contains(['/', '\\']) {
            return Err("rotation.file_prefix must not contain path separators".to_string());
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_start_day() -> u32 {
    1
}

fn default_export_folder() -> PathBuf {
    PathBuf::from("exported-database")
}

fn default_file_prefix() -> String {
    "rotation_export".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_poll_interval_seconds() -> u64 {
    86_400
}
