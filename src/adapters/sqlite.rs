//! SQLite-backed `payout_history` table.
//!
//! The pool is owned by the store and released by [`SqliteAuditStore::close`]; after that
//! every append fails, which the recorder turns into a fallback write.

use crate::domain::model::{AuditRecord, AuditStatus};
use crate::domain::ports::AuditStore;
use crate::utils::error::{PayoutError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

const MIGRATION: &str = "
CREATE TABLE IF NOT EXISTS payout_history (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_email TEXT NOT NULL,
    amount          TEXT NOT NULL,
    status          TEXT NOT NULL CHECK (status IN ('success', 'failed')),
    transaction_id  TEXT,
    error_message   TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_payout_history_created_at ON payout_history (created_at);
";

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SqliteAuditStore {
    pool: Mutex<Option<Pool<SqliteConnectionManager>>>,
    path: String,
}

impl SqliteAuditStore {
    /// Opens (creating if needed) the database and runs the schema migration.
    pub fn open(path: &Path, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
            ",
            )
        });

        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)?;

        pool.get()?.execute_batch(MIGRATION)?;

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, max_size = config.max_size, "Audit database opened");

        Ok(Self {
            pool: Mutex::new(Some(pool)),
            path: path_str,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn pool(&self) -> Result<Pool<SqliteConnectionManager>> {
        let guard = self
            .pool
            .lock()
            .map_err(|_| PayoutError::ConfigError {
                message: "audit database lock poisoned".to_string(),
            })?;
        guard.clone().ok_or_else(|| {
            PayoutError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "audit database is closed",
            ))
        })
    }

    /// Most recent records first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let pool = self.pool()?;
        tokio::task::spawn_blocking(move || -> Result<Vec<AuditRecord>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT recipient_email, amount, status, transaction_id, error_message, created_at
                 FROM payout_history ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (recipient_email, amount, status, transaction_id, error_message, created_at) =
                    row?;
                records.push(AuditRecord {
                    recipient_email,
                    amount: Decimal::from_str(&amount).map_err(|e| PayoutError::ConfigError {
                        message: format!("corrupt amount '{}' in payout_history: {}", amount, e),
                    })?,
                    status: if status == "success" {
                        AuditStatus::Success
                    } else {
                        AuditStatus::Failed
                    },
                    transaction_id,
                    error_message,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| PayoutError::ConfigError {
                            message: format!("corrupt timestamp '{}' in payout_history: {}", created_at, e),
                        })?,
                });
            }
            Ok(records)
        })
        .await
        .map_err(|e| PayoutError::IoError(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let pool = self.pool()?;
        let record = record.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO payout_history
                    (recipient_email, amount, status, transaction_id, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.recipient_email,
                    record.amount.to_string(),
                    record.status.as_str(),
                    record.transaction_id,
                    record.error_message,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            debug!(status = record.status.as_str(), "Audit record inserted");
            Ok(())
        })
        .await
        .map_err(|e| PayoutError::IoError(std::io::Error::other(e)))?
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.pool.lock() {
            guard.take();
        }
    }
}
