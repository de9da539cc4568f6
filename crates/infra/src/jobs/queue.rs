//! Postgres-backed queue operations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use tally_core::{EventId, LedgerId};

use crate::store::{map_sqlx_error, StoreError};

use super::types::{JobState, NewOutboxJob, OutboxJob, RetryPolicy};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {0} not found")]
    JobNotFound(i64),
}

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub retry: RetryPolicy,
    /// How long a `running` claim is honored before the job becomes
    /// reclaimable (crash recovery for workers that died mid-flight).
    pub lease: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lease: Duration::from_secs(60),
        }
    }
}

/// The durable work queue shared by the command service (producer) and the
/// webhook workers (consumers).
#[derive(Debug, Clone)]
pub struct OutboxQueue {
    pool: PgPool,
    config: QueueConfig,
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    event_id: i64,
    ledger_id: Uuid,
    state: String,
    attempt: i32,
    max_attempts: i32,
    run_at: DateTime<Utc>,
    locked_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Result<OutboxJob, StoreError> {
        let state = JobState::parse(&self.state)
            .ok_or_else(|| StoreError::corrupt("outbox_job", format!("state '{}'", self.state)))?;
        Ok(OutboxJob {
            id: self.id,
            event_id: EventId::from_i64(self.event_id),
            ledger_id: LedgerId::from_uuid(self.ledger_id),
            state,
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            run_at: self.run_at,
            locked_at: self.locked_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl OutboxQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue inside the caller's transaction; this is the transactional-outbox
    /// guarantee. The job becomes claimable only when the event commits.
    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job: NewOutboxJob,
    ) -> Result<i64, QueueError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox_jobs (event_id, ledger_id, max_attempts)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(job.event_id.as_i64())
        .bind(job.ledger_id.as_uuid())
        .bind(self.config.retry.max_attempts)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("enqueue_outbox_job", e))?;

        Ok(id)
    }

    /// Claim up to `n` due jobs for exclusive execution.
    ///
    /// Claims `available` and `retryable` jobs whose `run_at` has passed, and
    /// reclaims `running` jobs whose lease expired. The claim itself bumps
    /// `attempt`, so a reclaimed job counts its lost run.
    #[instrument(skip(self), err)]
    pub async fn fetch(&self, n: i64) -> Result<Vec<OutboxJob>, QueueError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            WITH due AS (
                SELECT id
                FROM outbox_jobs
                WHERE (state IN ('available', 'retryable') AND run_at <= NOW())
                   OR (state = 'running' AND locked_at <= NOW() - make_interval(secs => $2))
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_jobs j
            SET state = 'running',
                attempt = j.attempt + 1,
                locked_at = NOW(),
                updated_at = NOW()
            FROM due
            WHERE j.id = due.id
            RETURNING j.id, j.event_id, j.ledger_id, j.state, j.attempt, j.max_attempts,
                      j.run_at, j.locked_at, j.last_error, j.created_at, j.updated_at
            "#,
        )
        .bind(n)
        .bind(self.config.lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_outbox_jobs", e))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(row.into_job()?);
        }
        // UPDATE ... RETURNING does not promise row order; restore FIFO.
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    /// Mark a claimed job finished.
    pub async fn complete(&self, job: &OutboxJob) -> Result<(), QueueError> {
        self.transition(job.id, JobState::Completed, None, None).await
    }

    /// Record a failed attempt: reschedule with backoff, or discard once
    /// attempts are exhausted. Returns the state the job ended up in.
    pub async fn retry(&self, job: &OutboxJob, reason: &str) -> Result<JobState, QueueError> {
        if job.attempts_exhausted() {
            self.transition(job.id, JobState::Discarded, None, Some(reason))
                .await?;
            return Ok(JobState::Discarded);
        }

        let delay = self.config.retry.delay_for_attempt(job.attempt);
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.transition(job.id, JobState::Retryable, Some(run_at), Some(reason))
            .await?;
        Ok(JobState::Retryable)
    }

    /// Park a job permanently (non-retryable failure).
    pub async fn discard(&self, job: &OutboxJob, reason: &str) -> Result<(), QueueError> {
        self.transition(job.id, JobState::Discarded, None, Some(reason))
            .await
    }

    async fn transition(
        &self,
        job_id: i64,
        state: JobState,
        run_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_jobs
            SET state = $2,
                run_at = COALESCE($3, run_at),
                locked_at = NULL,
                last_error = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(state.as_str())
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition_outbox_job", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job_id));
        }
        Ok(())
    }

    /// Load one job by id (tests and operational inspection).
    pub async fn get(&self, job_id: i64) -> Result<Option<OutboxJob>, QueueError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, event_id, ledger_id, state, attempt, max_attempts,
                   run_at, locked_at, last_error, created_at, updated_at
            FROM outbox_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_outbox_job", e))?;

        row.map(|r| r.into_job().map_err(QueueError::from)).transpose()
    }
}
