//! Export sinks: where finished reports go

use async_trait::async_trait;
use dutylog_core::{Error, Result};
use std::path::PathBuf;

/// Receives a finished report
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Name used in logs and outcomes
    fn name(&self) -> &str;

    /// Deliver `contents` as `file_name`; returns a locator (path or URL) if the sink has one
    async fn deliver(&self, file_name: &str, contents: &str) -> Result<Option<String>>;
}

/// Writes reports into a local folder
#[derive(Debug, Clone)]
pub struct FileSink {
    folder: PathBuf,
}

impl FileSink {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &PathBuf {
        &self.folder
    }

    /// Remove a previously delivered report
    pub async fn remove(&self, file_name: &str) -> Result<()> {
        tokio::fs::remove_file(self.folder.join(file_name)).await?;
        Ok(())
    }
}

#[async_trait]
impl ExportSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&self, file_name: &str, contents: &str) -> Result<Option<String>> {
        if file_name.contains(['/', '\\']) {
            return Err(Error::Sink(format!(
                "report name '{}' must not contain path separators",
                file_name
            )));
        }

        tokio::fs::create_dir_all(&self.folder).await?;
        let path = self.folder.join(file_name);
        tokio::fs::write(&path, contents).await?;

        tracing::debug!("Report written to {:?}", path);
        Ok(Some(path.display().to_string()))
    }
}
