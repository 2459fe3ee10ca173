// SQLite JobStore Implementation

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use terraflow_core::domain::{Job, JobId, JobKind, JobStatus};
use terraflow_core::error::{AppError, Result};
use terraflow_core::port::{JobPatch, JobStore, TimeProvider};
use tracing::{debug, warn};

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => {
                        // UNIQUE constraint failed (duplicate job id)
                        AppError::Conflict(format!("record already exists: {}", db_err.message()))
                    }
                    "5" => {
                        // SQLITE_BUSY - database is locked
                        AppError::Database(format!(
                            "Database locked (SQLITE_BUSY): {}",
                            db_err.message()
                        ))
                    }
                    "13" => {
                        // SQLITE_FULL - database or disk is full
                        AppError::Database(format!("Database full: {}", db_err.message()))
                    }
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobStore {
    pool: SqlitePool,
    time: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time: Arc<dyn TimeProvider>) -> Self {
        Self { pool, time }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, project_id, kind, status,
                current_step, progress_message, error_message,
                cancelled, source_key, local_path, retry_count,
                created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.project_id)
        .bind(job.kind.as_str())
        .bind(job.status.as_str())
        .bind(&job.current_step)
        .bind(&job.progress_message)
        .bind(&job.error_message)
        .bind(job.cancelled as i32)
        .bind(&job.source_key)
        .bind(&job.local_path)
        .bind(job.retry_count)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_job()))
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        // Atomic claim: the inner SELECT picks the FIFO head, the UPDATE
        // flips it to processing in the same statement. Exactly one of
        // any number of concurrent callers wins a given row.
        let now = self.time.now_millis();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'processing', updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_job()))
    }

    async fn update(&self, id: &JobId, patch: JobPatch) -> Result<()> {
        // Terminal records are immutable: the guard turns late writes
        // (e.g. a completed-write racing a cancellation) into no-ops.
        let now = self.time.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = COALESCE(?, status),
                current_step = COALESCE(?, current_step),
                progress_message = COALESCE(?, progress_message),
                error_message = COALESCE(?, error_message),
                completed_at = COALESCE(?, completed_at),
                updated_at = ?
            WHERE id = ?
              AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(patch.status.map(|s| s.as_str().to_string()))
        .bind(&patch.current_step)
        .bind(&patch.progress_message)
        .bind(&patch.error_message)
        .bind(patch.completed_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

            match status {
                None => warn!(job_id = %id, "Update ignored: job not found"),
                Some(status) => {
                    debug!(job_id = %id, status = %status, "Update ignored: job already terminal")
                }
            }
        }

        Ok(())
    }

    async fn is_cancelled(&self, id: &JobId) -> Result<bool> {
        // Single-column projection; a missing job reads as not cancelled
        let cancelled: Option<i64> =
            sqlx::query_scalar("SELECT cancelled FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(cancelled.unwrap_or(0) != 0)
    }

    async fn cancel(&self, id: &JobId, at_millis: i64) -> Result<bool> {
        // Conditional update is the authority on whether cancellation
        // won the race against a terminal transition.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET cancelled = 1, status = 'cancelled', completed_at = ?, updated_at = ?
            WHERE id = ?
              AND status IN ('pending', 'processing')
            "#,
        )
        .bind(at_millis)
        .bind(at_millis)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE project_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|r| r.into_job()).collect())
    }

    async fn reset_stale_processing(&self) -> Result<u64> {
        let now = self.time.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', updated_at = ?
            WHERE status = 'processing'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, cutoff_millis: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE created_at < ?")
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn count_active(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(count)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    project_id: String,
    kind: String,
    status: String,
    current_step: Option<String>,
    progress_message: Option<String>,
    error_message: Option<String>,
    cancelled: i32, // SQLite boolean as integer
    source_key: Option<String>,
    local_path: Option<String>,
    retry_count: i32,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Job {
        Job {
            id: self.id,
            project_id: self.project_id,
            // A row with an unknown kind/status would be a migration bug;
            // fail closed rather than guess a pipeline.
            kind: JobKind::parse(&self.kind).unwrap_or(JobKind::PointCloud),
            status: JobStatus::parse(&self.status).unwrap_or(JobStatus::Failed),
            current_step: self.current_step,
            progress_message: self.progress_message,
            error_message: self.error_message,
            cancelled: self.cancelled != 0,
            source_key: self.source_key,
            local_path: self.local_path,
            retry_count: self.retry_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}
