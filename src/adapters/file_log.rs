use crate::domain::model::{AuditRecord, AuditStatus};
use crate::domain::ports::AuditStore;
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const SUCCESS_PREFIX: &str = "Payout successful: ";
const FAILURE_PREFIX: &str = "Payout failed: ";

/// Append-only log file used when the database is missing or failing.
///
/// Each line reads `<rfc3339> - <LEVEL>: Payout successful|failed: <record json>`.
pub struct FileAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format_line(record: &AuditRecord) -> Result<String> {
        let (level, prefix) = match record.status {
            AuditStatus::Success => ("INFO", SUCCESS_PREFIX),
            AuditStatus::Failed => ("ERROR", FAILURE_PREFIX),
        };
        let json = serde_json::to_string(record)?;
        Ok(format!(
            "{} - {}: {}{}\n",
            Utc::now().to_rfc3339(),
            level,
            prefix,
            json
        ))
    }

    /// Extracts the audit record from a line written by this log, if it is one.
    pub fn parse_line(line: &str) -> Option<AuditRecord> {
        let (_, message) = line.split_once(": ")?;
        let json = message
            .strip_prefix(SUCCESS_PREFIX)
            .or_else(|| message.strip_prefix(FAILURE_PREFIX))?;
        serde_json::from_str(json).ok()
    }

    pub async fn read_records(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(content.lines().filter_map(Self::parse_line).collect())
    }
}

#[async_trait]
impl AuditStore for FileAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let line = Self::format_line(record)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file log"
    }
}
