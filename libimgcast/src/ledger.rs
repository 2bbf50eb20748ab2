//! Dedup ledger
//!
//! Durable record of every fingerprint whose post was confirmed. This is the
//! only memory shared between runs: a fingerprint in here is never offered
//! for upload again.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{LedgerError, Result};
use crate::hasher::ContentFingerprint;

/// One confirmed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub fingerprint: ContentFingerprint,
    pub path: String,
    pub posted_at: i64,
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (or create) the ledger at `ledger_path`
    ///
    /// An existing file that SQLite cannot read is reported as
    /// [`LedgerError::Corrupt`] and left untouched on disk.
    pub async fn open(ledger_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(ledger_path).to_string();
        let path = Path::new(&expanded_path);
        let existed = path.exists();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(LedgerError::IoError)?;
            }
        }

        // Forward slashes work for SQLite URLs on every platform
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let corrupt = |detail: String| LedgerError::Corrupt {
            path: expanded_path.clone(),
            detail,
        };

        let pool = match SqlitePool::connect(&db_url).await {
            Ok(pool) => pool,
            Err(e) if existed => return Err(corrupt(e.to_string()).into()),
            Err(e) => return Err(LedgerError::SqlxError(e).into()),
        };

        if existed {
            match sqlx::query_scalar::<_, String>("PRAGMA quick_check")
                .fetch_one(&pool)
                .await
            {
                Ok(status) if status == "ok" => {}
                Ok(status) => return Err(corrupt(status).into()),
                Err(e) => return Err(corrupt(e.to_string()).into()),
            }
        }

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(LedgerError::MigrationError)?;

        tracing::debug!("Opened ledger at {}", expanded_path);
        Ok(Self { pool })
    }

    /// Whether `fingerprint` has already been confirmed
    pub async fn contains(&self, fingerprint: &ContentFingerprint) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM uploads WHERE sha256 = ?")
            .bind(fingerprint.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::SqlxError)?;

        Ok(row.is_some())
    }

    /// Record a confirmed upload
    ///
    /// Recording a fingerprint that is already present leaves the existing
    /// entry as it is. Returns whether a new entry was created.
    pub async fn record(&self, fingerprint: &ContentFingerprint, path: &Path) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO uploads (sha256, path, posted_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(fingerprint.as_str())
        .bind(path.to_string_lossy().to_string())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(LedgerError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Look up the entry for `fingerprint`
    pub async fn entry(&self, fingerprint: &ContentFingerprint) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            r#"
            SELECT sha256, path, posted_at
            FROM uploads WHERE sha256 = ?
            "#,
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::SqlxError)?;

        Ok(row.map(|r| LedgerEntry {
            fingerprint: ContentFingerprint::from_hex(r.get::<String, _>("sha256")),
            path: r.get("path"),
            posted_at: r.get("posted_at"),
        }))
    }

    /// Number of confirmed fingerprints
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM uploads")
            .fetch_one(&self.pool)
            .await
            .map_err(LedgerError::SqlxError)?;

        Ok(count as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Close the underlying pool, flushing pending writes
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
