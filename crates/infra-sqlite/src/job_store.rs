// SQLite JobStore Implementation

use async_trait::async_trait;
use queuectl_core::domain::{DomainError, Job, JobId, JobState};
use queuectl_core::error::{AppError, Result};
use queuectl_core::port::job_store::empty_counts;
use queuectl_core::port::{JobStore, StateCounts, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};

// SQLite extended result codes: https://www.sqlite.org/rescode.html
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(SQLITE_CONSTRAINT_UNIQUE) | Some(SQLITE_CONSTRAINT_PRIMARYKEY)
        ),
        _ => false,
    }
}

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                match code_str {
                    SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY => {
                        AppError::Conflict(format!(
                            "Unique constraint violation: {} ({})",
                            db_err.message(),
                            code_str
                        ))
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
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// Explain why a guarded update touched no row
    async fn rejected_update(&self, id: &JobId, target: JobState) -> AppError {
        let current: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT state FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(None) => AppError::NotFound(format!("Job {} not found", id)),
            Ok(Some(current_state)) => AppError::InvalidState(format!(
                "Cannot update job {} from {} to {}",
                id, current_state, target
            )),
            Err(e) => map_sqlx_error(e),
        }
    }
}

fn reject_transient(state: JobState) -> Result<()> {
    if state == JobState::Failed {
        return Err(AppError::InvalidState(
            "'failed' is resolved to pending or dead and never stored".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, command, state, max_retries, attempts,
                created_at, updated_at, run_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(JobState::Pending.as_str())
        .bind(i64::from(job.max_retries))
        .bind(i64::from(job.attempts))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.run_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(DomainError::DuplicateId(job.id.clone()).into())
            }
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim_next(&self, now_millis: i64) -> Result<Option<Job>> {
        // Select and flip in one statement: SQLite takes the write lock before
        // evaluating the sub-select, so two claimers can never pick the same row.
        // rowid breaks created_at ties in insertion order.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = ?, updated_at = MAX(updated_at, ?)
            WHERE id = (
                SELECT j.id FROM jobs j
                WHERE j.state = ? AND j.run_at <= ?
                ORDER BY j.created_at ASC, j.rowid ASC
                LIMIT 1
            )
              AND state = ?
            RETURNING *
            "#,
        )
        .bind(JobState::Processing.as_str())
        .bind(now_millis)
        .bind(JobState::Pending.as_str())
        .bind(now_millis)
        .bind(JobState::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(r) = &row {
            debug!(job_id = %r.id, "Claimed job");
        }
        row.map(JobRow::into_job).transpose()
    }

    async fn apply_outcome(
        &self,
        id: &JobId,
        state: JobState,
        attempts: Option<u32>,
    ) -> Result<()> {
        reject_transient(state)?;
        let now = self.time_provider.now_millis();

        // Conditional update: completed and dead rows are immutable here
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempts = COALESCE(?, attempts), updated_at = MAX(updated_at, ?)
            WHERE id = ?
              AND state NOT IN ('completed', 'dead')
            "#,
        )
        .bind(state.as_str())
        .bind(attempts.map(i64::from))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(id, state).await);
        }
        Ok(())
    }

    async fn schedule_retry(&self, id: &JobId, attempts: u32, run_at: i64) -> Result<()> {
        let now = self.time_provider.now_millis();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempts = ?, run_at = ?, updated_at = MAX(updated_at, ?)
            WHERE id = ?
              AND state NOT IN ('completed', 'dead')
            "#,
        )
        .bind(JobState::Pending.as_str())
        .bind(i64::from(attempts))
        .bind(run_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(id, JobState::Pending).await);
        }
        Ok(())
    }

    async fn requeue_from_dead(&self, id: &JobId) -> Result<bool> {
        let now = self.time_provider.now_millis();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempts = 0, run_at = ?, updated_at = MAX(updated_at, ?)
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(JobState::Pending.as_str())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(JobState::Dead.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE state = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn counts_by_state(&self) -> Result<StateCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut counts = empty_counts();
        for (state, count) in rows {
            match state.parse::<JobState>() {
                Ok(s) => {
                    counts.insert(s, count);
                }
                Err(_) => warn!(state = %state, count = count, "Ignoring unknown job state"),
            }
        }
        Ok(counts)
    }

    async fn find_stale_processing(&self, updated_before: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE state = ? AND updated_at < ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(JobState::Processing.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    max_retries: i64,
    attempts: i64,
    created_at: i64,
    updated_at: i64,
    run_at: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let state = self
            .state
            .parse::<JobState>()
            .map_err(|e| AppError::Database(format!("Corrupt row {}: {}", self.id, e)))?;

        let max_retries = u32::try_from(self.max_retries).map_err(|_| {
            AppError::Database(format!("Corrupt row {}: max_retries out of range", self.id))
        })?;
        let attempts = u32::try_from(self.attempts).map_err(|_| {
            AppError::Database(format!("Corrupt row {}: attempts out of range", self.id))
        })?;

        Ok(Job {
            id: self.id,
            command: self.command,
            state,
            max_retries,
            attempts,
            created_at: self.created_at,
            updated_at: self.updated_at,
            run_at: self.run_at,
        })
    }
}
