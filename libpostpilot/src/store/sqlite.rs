//! SQLite-backed persistent store

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{Result, StoreError};
use crate::external::ContentStore;
use crate::idempotency::{IdempotencyRecord, LedgerStatus, ReserveOutcome};
use crate::store::{IdempotencyStore, JobStore};
use crate::types::{ContentItem, ContentStatus, Job, JobStatus};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            // A pooled second connection would see its own empty in-memory
            // database, so cap the pool at one.
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .map_err(StoreError::SqlxError)?
        } else {
            let expanded = shellexpand::tilde(db_path).to_string();
            let path = Path::new(&expanded);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(StoreError::IoError)?;
            }
            // mode=rwc allows creating the database file if it doesn't exist
            let db_url = format!("sqlite://{}?mode=rwc", expanded.replace('\\', "/"));
            SqlitePool::connect(&db_url)
                .await
                .map_err(StoreError::SqlxError)?
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StoreError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Seed a content item. Owner-side operation, not part of the
    /// [`ContentStore`] trait.
    pub async fn insert_content(&self, item: &ContentItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contents (id, title, body, media_ref, status, status_reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.media_ref)
        .bind(item.status.as_str())
        .bind(&item.status_reason)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;
        Ok(())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let platform: String = row.get("platform");
    let status: String = row.get("status");
    let outcome_raw: Option<String> = row.get("outcome");
    let outcome = outcome_raw
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("job outcome unreadable: {}", e)))?;

    Ok(Job {
        id: row.get("id"),
        content_id: row.get("content_id"),
        platform: platform.parse().map_err(StoreError::Corrupt)?,
        run_at: row.get("run_at"),
        attempts: row.get::<i64, _>("attempts") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        status: status.parse().map_err(StoreError::Corrupt)?,
        idempotency_key: row.get("idempotency_key"),
        outcome,
        last_error: row.get("last_error"),
        next_retry_at: row.get("next_retry_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const JOB_COLUMNS: &str = "id, content_id, platform, run_at, attempts, max_attempts, status, \
                           idempotency_key, outcome, last_error, next_retry_at, created_at, updated_at";

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let outcome = job
            .outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("job outcome unserializable: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, content_id, platform, run_at, attempts, max_attempts, status,
                              idempotency_key, outcome, last_error, next_retry_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.content_id)
        .bind(job.platform.as_str())
        .bind(job.run_at)
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(job.status.as_str())
        .bind(&job.idempotency_key)
        .bind(outcome)
        .bind(&job.last_error)
        .bind(job.next_retry_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let query = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Job>> {
        let query = format!("SELECT {} FROM jobs WHERE idempotency_key = ?", JOB_COLUMNS);
        let row = sqlx::query(&query)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let outcome = job
            .outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("job outcome unserializable: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET run_at = ?, attempts = ?, status = ?, outcome = ?, last_error = ?,
                next_retry_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.run_at)
        .bind(job.attempts as i64)
        .bind(job.status.as_str())
        .bind(outcome)
        .bind(&job.last_error)
        .bind(job.next_retry_at)
        .bind(job.updated_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;
        Ok(())
    }

    async fn due(&self, cutoff: i64, limit: u32) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {} FROM jobs WHERE status = 'pending' AND run_at <= ? ORDER BY run_at LIMIT ?",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;
        rows.iter().map(job_from_row).collect()
    }

    async fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                let query = format!(
                    "SELECT {} FROM jobs WHERE status = ? ORDER BY run_at, created_at LIMIT ?",
                    JOB_COLUMNS
                );
                sqlx::query(&query)
                    .bind(status.as_str())
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM jobs ORDER BY run_at, created_at LIMIT ?",
                    JOB_COLUMNS
                );
                sqlx::query(&query)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StoreError::SqlxError)?;
        rows.iter().map(job_from_row).collect()
    }

    async fn stale_running(&self, older_than: i64) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {} FROM jobs WHERE status = 'running' AND updated_at < ?",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(older_than)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;
        rows.iter().map(job_from_row).collect()
    }

    async fn status_counts(&self) -> Result<HashMap<JobStatus, u32>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.get("status");
            let status: JobStatus = status.parse().map_err(StoreError::Corrupt)?;
            counts.insert(status, row.get::<i64, _>("n") as u32);
        }
        Ok(counts)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<IdempotencyRecord> {
    let status: String = row.get("status");
    Ok(IdempotencyRecord {
        key: row.get("key"),
        status: status.parse::<LedgerStatus>().map_err(StoreError::Corrupt)?,
        result: row.get("result"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl IdempotencyStore for SqliteStore {
    async fn reserve(&self, key: &str, now: i64, ttl_secs: i64) -> Result<ReserveOutcome> {
        // The conflict-free insert is the atomicity point: exactly one
        // concurrent caller gets rows_affected == 1.
        for _ in 0..3 {
            let inserted = sqlx::query(
                r#"
                INSERT INTO idempotency_records (key, status, result, created_at)
                VALUES (?, 'pending', NULL, ?)
                ON CONFLICT(key) DO NOTHING
                "#,
            )
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

            if inserted.rows_affected() == 1 {
                return Ok(ReserveOutcome::Reserved);
            }

            let row = sqlx::query(
                "SELECT key, status, result, created_at FROM idempotency_records WHERE key = ?",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

            let Some(row) = row else {
                // Raced with a release; retry the insert.
                continue;
            };
            let record = record_from_row(&row)?;

            if now - record.created_at >= ttl_secs {
                // Lazy expiry: delete the stale row, then retry the insert.
                sqlx::query("DELETE FROM idempotency_records WHERE key = ? AND created_at = ?")
                    .bind(key)
                    .bind(record.created_at)
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::SqlxError)?;
                continue;
            }

            return Ok(ReserveOutcome::Existing(record));
        }

        Err(StoreError::Corrupt(format!("reservation for key {} did not settle", key)).into())
    }

    async fn commit(&self, key: &str, status: LedgerStatus, result: &str) -> Result<()> {
        sqlx::query(
            "UPDATE idempotency_records SET status = ?, result = ? WHERE key = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(result)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_records WHERE key = ? AND status = 'pending'")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT key, status, result, created_at FROM idempotency_records WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;
        row.as_ref().map(record_from_row).transpose()
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn get_content(&self, content_id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query(
            "SELECT id, title, body, media_ref, status, status_reason, created_at FROM contents WHERE id = ?",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        row.map(|r| {
            let status: String = r.get("status");
            Ok(ContentItem {
                id: r.get("id"),
                title: r.get("title"),
                body: r.get("body"),
                media_ref: r.get("media_ref"),
                status: status.parse::<ContentStatus>().map_err(StoreError::Corrupt)?,
                status_reason: r.get("status_reason"),
                created_at: r.get("created_at"),
            })
        })
        .transpose()
    }

    async fn set_status(
        &self,
        content_id: &str,
        status: ContentStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE contents SET status = ?, status_reason = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(reason)
            .bind(content_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;
        Ok(())
    }
}
