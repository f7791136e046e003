//! `SummarizeJobRepository`: the queue surface backing `SummarizeJobEngine`.
//!
//! `get_pending_jobs` is the work-stealing primitive: `FOR UPDATE SKIP
//! LOCKED` ensures concurrent workers never see the same pending row.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{NilConnectionError, ServiceError};
use crate::repo::models::{JobStatus, SummarizeJob};

pub struct SummarizeJobRepository {
    pool: Option<PgPool>,
}

impl SummarizeJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Some(pool) }
    }

    pub fn disconnected() -> Self {
        Self { pool: None }
    }

    fn pool(&self) -> Result<&PgPool, ServiceError> {
        self.pool.as_ref().ok_or_else(|| ServiceError::Fatal(NilConnectionError.to_string()))
    }

    pub async fn create_job(&self, article_id: i64, max_retries: i32) -> Result<Uuid, ServiceError> {
        let pool = self.pool()?;
        let job_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO summarize_job_queue (job_id, article_id, status, retry_count, max_retries) \
             VALUES ($1, $2, 'pending', 0, $3)",
        )
        .bind(job_id)
        .bind(article_id)
        .bind(max_retries)
        .execute(pool)
        .await
        .map_err(|e| ServiceError::TransientExternal(format!("failed to create summarize job: {e}")))?;
        info!(%job_id, article_id, "summarize job created");
        Ok(job_id)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<SummarizeJob, ServiceError> {
        let pool = self.pool()?;
        let start = std::time::Instant::now();
        let job: Option<SummarizeJob> = sqlx::query_as(
            "SELECT id, job_id, article_id, status, summary, error_message, retry_count, max_retries, \
                    created_at, started_at, completed_at \
             FROM summarize_job_queue WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| ServiceError::TransientExternal(format!("failed to get summarize job: {e}")))?;
        debug!(%job_id, elapsed_ms = start.elapsed().as_millis() as u64, "get_job query completed");

        job.ok_or_else(|| ServiceError::NotFound(format!("summarize job {job_id}")))
    }

    /// Selects and claims pending jobs in one statement: the `SELECT ...
    /// FOR UPDATE SKIP LOCKED` subquery picks the rows while the outer
    /// `UPDATE` flips them to `running` before the row locks are released,
    /// so a second, concurrent caller can never observe (and re-claim) the
    /// same row — the lock only ever protects a row that is still
    /// `pending`; a plain `SELECT` would let the lock expire at commit time
    /// while the row was still `pending`, open for the next caller to pick.
    pub async fn get_pending_jobs(&self, limit: i64) -> Result<Vec<SummarizeJob>, ServiceError> {
        let pool = self.pool()?;
        sqlx::query_as(
            "UPDATE summarize_job_queue SET status = 'running', started_at = $2 \
             WHERE id IN ( \
                 SELECT id FROM summarize_job_queue \
                 WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, job_id, article_id, status, summary, error_message, retry_count, max_retries, \
                       created_at, started_at, completed_at",
        )
        .bind(limit)
        .bind(Utc::now())
        .fetch_all(pool)
        .await
        .map_err(|e| ServiceError::TransientExternal(format!("failed to claim pending summarize jobs: {e}")))
    }

    /// Transitions `job_id` according to `status`, committing under a
    /// read-committed transaction. `failed` atomically increments
    /// `retry_count` and promotes to `dead_letter` once it reaches
    /// `max_retries`; other statuses are a plain column update. `running`
    /// is not reachable here — claiming a job as running happens only via
    /// `get_pending_jobs`'s atomic claim.
    pub async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        summary: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), ServiceError> {
        let pool = self.pool()?;
        let mut tx: Transaction<'_, Postgres> = pool
            .begin()
            .await
            .map_err(|e| ServiceError::TransientExternal(format!("failed to begin transaction: {e}")))?;

        let affected = match status {
            JobStatus::Running => {
                sqlx::query("UPDATE summarize_job_queue SET status = 'running', started_at = $2 WHERE job_id = $1")
                    .bind(job_id)
                    .bind(Utc::now())
                    .execute(&mut *tx)
                    .await
            }
            JobStatus::Completed => {
                sqlx::query(
                    "UPDATE summarize_job_queue SET status = 'completed', summary = $2, completed_at = $3 WHERE job_id = $1",
                )
                .bind(job_id)
                .bind(summary)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await
            }
            JobStatus::Failed => {
                sqlx::query(
                    "UPDATE summarize_job_queue SET \
                        retry_count = retry_count + 1, \
                        error_message = $2, \
                        status = CASE WHEN retry_count + 1 >= max_retries THEN 'dead_letter' ELSE 'pending' END, \
                        completed_at = CASE WHEN retry_count + 1 >= max_retries THEN $3 ELSE completed_at END \
                     WHERE job_id = $1",
                )
                .bind(job_id)
                .bind(error)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await
            }
            JobStatus::Pending | JobStatus::DeadLetter => {
                sqlx::query("UPDATE summarize_job_queue SET status = $2 WHERE job_id = $1")
                    .bind(job_id)
                    .bind(status.as_str())
                    .execute(&mut *tx)
                    .await
            }
        }
        .map_err(|e| ServiceError::TransientExternal(format!("failed to update summarize job status: {e}")))?;

        if affected.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| ServiceError::TransientExternal(format!("failed to rollback transaction: {e}")))?;
            return Err(ServiceError::NotFound(format!("summarize job {job_id}")));
        }

        tx.commit()
            .await
            .map_err(|e| ServiceError::TransientExternal(format!("failed to commit transaction: {e}")))?;
        Ok(())
    }

    /// Sweeps jobs stuck in `running` longer than `stale_after` back to
    /// `pending`, so a crashed worker's in-flight job is eventually retried.
    pub async fn reclaim_stale_running_jobs(&self, stale_after: chrono::Duration) -> Result<u64, ServiceError> {
        let pool = self.pool()?;
        let cutoff = Utc::now() - stale_after;
        let result = sqlx::query(
            "UPDATE summarize_job_queue SET status = 'pending', started_at = NULL \
             WHERE status = 'running' AND started_at < $1",
        )
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(|e| ServiceError::TransientExternal(format!("failed to reclaim stale jobs: {e}")))?;

        if result.rows_affected() > 0 {
            info!(reclaimed = result.rows_affected(), "reclaimed stale running jobs");
        }
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnected_repository_returns_nil_connection_error() {
        let repo = SummarizeJobRepository::disconnected();
        let err = repo.get_pending_jobs(10).await.unwrap_err();
        assert!(matches!(err, ServiceError::Fatal(_)));
    }
}
