//! Ingest job repository implementation.
//!
//! All persisted status changes go through conditional updates keyed on
//! the expected current status, so concurrent workers, the webhook
//! receiver, and the poll loop can race without corrupting a job. A
//! lost race surfaces as `Ok(false)`, never as a partial write.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use docflow_core::{
    defaults, state, Error, ErrorClass, ErrorClassTag, Job, JobRepository, JobStatus, Result,
};

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// How long a claimed `awaiting_external` job is held back from
    /// re-claiming, in milliseconds.
    poll_hold_ms: i64,
}

const JOB_COLUMNS: &str = "id, document_id, status::text AS status, attempt_count, max_attempts, \
     last_error, error_class, external_reference, degraded, created_at, updated_at";

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            poll_hold_ms: defaults::POLL_INTERVAL_MS as i64,
        }
    }

    /// Override the hold-back applied to claimed `awaiting_external` jobs.
    pub fn with_poll_hold_ms(mut self, ms: i64) -> Self {
        self.poll_hold_ms = ms;
        self
    }

    /// Convert string from database to JobStatus.
    fn str_to_status(s: &str) -> JobStatus {
        JobStatus::parse(s).unwrap_or(JobStatus::Queued)
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        let error_class: Option<String> = row.get("error_class");
        Job {
            id: row.get("id"),
            document_id: row.get("document_id"),
            status: Self::str_to_status(row.get("status")),
            attempt_count: row.get("attempt_count"),
            max_attempts: row.get("max_attempts"),
            last_error: row.get("last_error"),
            error_class: error_class
                .as_deref()
                .and_then(ErrorClass::parse)
                .map(ErrorClassTag::from),
            external_reference: row.get("external_reference"),
            degraded: row.get("degraded"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create_for_document(&self, document_id: Uuid) -> Result<Job> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        let row = sqlx::query(&format!(
            "INSERT INTO ingest_job
                 (id, document_id, status, attempt_count, max_attempts, degraded,
                  created_at, updated_at)
             VALUES ($1, $2, 'queued'::ingest_status, 0, $3, FALSE, $4, $4)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(document_id)
        .bind(defaults::JOB_MAX_ATTEMPTS)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_job_row(row))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ingest_job WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn get_for_document(&self, document_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ingest_job
             WHERE document_id = $1
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn find_active_for_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT j.{}
             FROM ingest_job j
             JOIN document d ON d.id = j.document_id
             WHERE d.owner_id = $1
               AND d.content_hash = $2
               AND d.deleted_at IS NULL
               AND j.status::text NOT IN ('complete', 'failed', 'cancelled')
             ORDER BY j.created_at DESC
             LIMIT 1",
            JOB_COLUMNS.replace(", ", ", j.")
        ))
        .bind(owner_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn claim_next(&self, claimable: &[JobStatus]) -> Result<Option<Job>> {
        let now = Utc::now();
        let status_strings: Vec<String> =
            claimable.iter().map(|s| s.as_str().to_string()).collect();

        // The claim moves the row to the successor in-progress status in
        // the same statement that locks it. `awaiting_external` is claimed
        // in place (resolution is its own compare-and-swap) but held back
        // via poll_after so the poll loop does not spin on one job.
        let row = sqlx::query(&format!(
            "UPDATE ingest_job
             SET status = CASE status::text
                     WHEN 'queued' THEN 'submitting'::ingest_status
                     WHEN 'parsed' THEN 'chunking'::ingest_status
                     WHEN 'chunked' THEN 'embedding'::ingest_status
                     ELSE status
                 END,
                 poll_after = CASE status::text
                     WHEN 'awaiting_external' THEN $2 + $3 * interval '1 millisecond'
                     ELSE NULL
                 END,
                 updated_at = $2
             WHERE id = (
                 SELECT id FROM ingest_job
                 WHERE status::text = ANY($1)
                   AND (status::text <> 'awaiting_external'
                        OR poll_after IS NULL OR poll_after <= $2)
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(&status_strings)
        .bind(now)
        .bind(self.poll_hold_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn transition(&self, job_id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool> {
        state::check_transition(from, to)?;

        let result = sqlx::query(
            "UPDATE ingest_job
             SET status = $3::ingest_status, updated_at = $4
             WHERE id = $1 AND status::text = $2",
        )
        .bind(job_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_external_reference(&self, job_id: Uuid, reference: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ingest_job SET external_reference = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(job_id)
        .bind(reference)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Job {} not found", job_id)));
        }
        Ok(())
    }

    async fn set_degraded(&self, job_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ingest_job
             SET degraded = TRUE, error_class = $2, updated_at = $3
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(ErrorClass::DegradedFallback.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Job {} not found", job_id)));
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        error: &str,
        class: ErrorClass,
    ) -> Result<JobStatus> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(
            "SELECT status::text AS status, attempt_count, max_attempts
             FROM ingest_job WHERE id = $1
             FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;

        let status = Self::str_to_status(row.get("status"));
        let attempt_count: i32 = row.get("attempt_count");
        let max_attempts: i32 = row.get("max_attempts");

        // A failure recorded against a terminal job is a stale worker.
        if status.is_terminal() {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(status);
        }

        let new_count = attempt_count + 1;
        let (next_status, recorded_class) = match class {
            ErrorClass::Transient if new_count < max_attempts => {
                (state::rollback_on_retry(status), ErrorClass::Transient)
            }
            ErrorClass::Transient => (JobStatus::Failed, ErrorClass::TerminalExhausted),
            ErrorClass::TerminalInput => (JobStatus::Failed, ErrorClass::TerminalInput),
            ErrorClass::TerminalExhausted => (JobStatus::Failed, ErrorClass::TerminalExhausted),
            // Degraded fallback is not a failure route; record the class
            // but leave the status to the pipeline.
            ErrorClass::DegradedFallback => (status, ErrorClass::DegradedFallback),
        };

        sqlx::query(
            "UPDATE ingest_job
             SET status = $2::ingest_status,
                 attempt_count = $3,
                 last_error = $4,
                 error_class = $5,
                 poll_after = NULL,
                 updated_at = $6
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(next_status.as_str())
        .bind(new_count)
        .bind(error)
        .bind(recorded_class.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(next_status)
    }

    async fn fail_from(
        &self,
        job_id: Uuid,
        from: JobStatus,
        error: &str,
        class: ErrorClass,
    ) -> Result<bool> {
        state::check_transition(from, JobStatus::Failed)?;

        let result = sqlx::query(
            "UPDATE ingest_job
             SET status = 'failed'::ingest_status,
                 attempt_count = attempt_count + 1,
                 last_error = $3,
                 error_class = $4,
                 poll_after = NULL,
                 updated_at = $5
             WHERE id = $1 AND status::text = $2",
        )
        .bind(job_id)
        .bind(from.as_str())
        .bind(error)
        .bind(class.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ingest_job
             SET status = 'cancelled'::ingest_status, updated_at = $2
             WHERE id = $1
               AND status::text NOT IN ('complete', 'failed', 'cancelled')",
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn status_counts(&self) -> Result<Vec<(JobStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status::text AS status, COUNT(*) AS count
             FROM ingest_job
             GROUP BY status
             ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let status: String = row.get("status");
                let count: i64 = row.get("count");
                JobStatus::parse(&status).map(|s| (s, count))
            })
            .collect())
    }
}
