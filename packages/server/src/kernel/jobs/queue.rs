//! PostgreSQL-backed job queue implementation.
//!
//! This module provides the queue contract used by producers (the ingestion
//! path) and by the [`JobRunner`](super::JobRunner), plus the Postgres
//! implementation of it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::job::{ErrorKind, FailureTransition, Job, RetryPolicy};

const JOB_COLUMNS: &str = r#"
    id, job_type, reference_id, args, next_run_at, attempt, max_attempts, timeout_ms,
    lease_duration_ms, lease_expires_at, worker_id, status, error_message, error_kind,
    dead_lettered_at, idempotency_key, created_at, updated_at
"#;

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Command was enqueued, returns new job ID
    Created(Uuid),
    /// A live job with the same idempotency key exists, returns its ID
    Duplicate(Uuid),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or duplicate
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// A claimed job ready for execution.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The job ID
    pub id: Uuid,
    /// The job record as it was claimed (attempt already incremented)
    pub job: Job,
}

impl ClaimedJob {
    pub fn new(job: Job) -> Self {
        Self { id: job.id, job }
    }

    /// Deserialize the command payload.
    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        serde_json::from_value(self.job.args.clone())
            .map_err(|e| anyhow!("failed to deserialize command: {}", e))
    }

    /// Get the command type (job_type)
    pub fn command_type(&self) -> &str {
        &self.job.job_type
    }
}

/// Everything needed to insert a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_type: String,
    pub args: serde_json::Value,
    pub reference_id: Option<Uuid>,
    /// If set, at most one pending/running job exists with this key
    pub idempotency_key: Option<String>,
    /// Falls back to the queue's default when `None`
    pub max_attempts: Option<i32>,
    pub timeout_ms: Option<i64>,
    /// Run immediately when `None`
    pub run_at: Option<DateTime<Utc>>,
}

/// Metadata for command serialization.
///
/// Commands implement this trait to provide type information and optional
/// idempotency keys.
pub trait CommandMeta {
    /// The command type name (used as job_type).
    fn command_type(&self) -> &'static str;

    /// Optional idempotency key.
    ///
    /// If provided, ensures only one pending/running job exists with this key.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    /// Optional reference ID for the job.
    fn reference_id(&self) -> Option<Uuid> {
        None
    }

    /// Maximum attempts for this command; `None` uses the queue default.
    fn max_attempts(&self) -> Option<i32> {
        None
    }

    /// Per-attempt timeout; `None` uses the job default.
    fn timeout_ms(&self) -> Option<i64> {
        None
    }
}

/// Serialize a command into a [`JobSpec`].
pub fn job_spec<C>(command: &C) -> Result<JobSpec>
where
    C: Serialize + CommandMeta,
{
    Ok(JobSpec {
        job_type: command.command_type().to_string(),
        args: serde_json::to_value(command)?,
        reference_id: command.reference_id(),
        idempotency_key: command.idempotency_key(),
        max_attempts: command.max_attempts(),
        timeout_ms: command.timeout_ms(),
        run_at: None,
    })
}

/// Enqueue a typed command on any queue implementation.
pub async fn enqueue_command<C>(queue: &dyn JobQueue, command: &C) -> Result<EnqueueResult>
where
    C: Serialize + CommandMeta + Sync,
{
    queue.enqueue(job_spec(command)?).await
}

/// Trait for job queue operations.
///
/// Implementations provide the storage and retrieval of serialized commands
/// for background execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job.
    ///
    /// If `spec` carries an idempotency key and a matching pending/running
    /// job exists, returns `EnqueueResult::Duplicate` with the existing job ID.
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult>;

    /// Claim up to `limit` runnable jobs for `worker_id`.
    ///
    /// Claimed jobs move to `running` with a fresh lease and their attempt
    /// counter incremented. Running jobs whose lease expired are claimable.
    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>>;

    /// Mark a job as successfully completed.
    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()>;

    /// Mark the current attempt as failed.
    ///
    /// Retryable failures with attempts remaining go back to pending after a
    /// backoff. Otherwise the job becomes terminal.
    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()>;

    /// Return a claimed job that never started, without consuming an attempt.
    async fn release(&self, job_id: Uuid) -> Result<()>;

    /// Extend the lease for a running job.
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;

    /// Find the pending or running job holding `key`, if any.
    async fn find_live_by_idempotency_key(&self, key: &str) -> Result<Option<Job>>;

    /// Most recently created job for `key`, whatever its status.
    async fn find_latest_by_idempotency_key(&self, key: &str) -> Result<Option<Job>>;

    async fn find_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Dead-letter running jobs whose lease expired after their last attempt.
    async fn dead_letter_abandoned(&self) -> Result<u64>;

    /// Delete succeeded jobs last touched before `succeeded_before` and
    /// failed or dead-lettered ones last touched before `failed_before`.
    async fn purge_terminal(
        &self,
        succeeded_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64>;
}

/// PostgreSQL-backed job queue implementation.
pub struct PostgresJobQueue {
    pool: PgPool,
    default_lease_ms: i64,
    default_max_attempts: i32,
    retry_policy: RetryPolicy,
}

impl PostgresJobQueue {
    /// Create a new PostgreSQL job queue.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_lease_ms: 60_000, // 1 minute
            default_max_attempts: 3,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Create with a custom lease duration.
    pub fn with_lease_duration(mut self, lease_ms: i64) -> Self {
        self.default_lease_ms = lease_ms;
        self
    }

    async fn fetch(&self, job_id: Uuid) -> Result<Job> {
        self.find_job(job_id)
            .await?
            .ok_or_else(|| anyhow!("job {} not found", job_id))
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult> {
        let job = Job::from_spec(&spec, self.default_max_attempts, self.default_lease_ms);

        // The partial unique index on live idempotency keys turns a
        // concurrent duplicate into an empty RETURNING set.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (
                id, job_type, reference_id, args, next_run_at, attempt, max_attempts,
                timeout_ms, lease_duration_ms, status, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, 'pending', $9)
            ON CONFLICT (idempotency_key) WHERE status IN ('pending', 'running') DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(job.reference_id)
        .bind(&job.args)
        .bind(job.next_run_at)
        .bind(job.max_attempts)
        .bind(job.timeout_ms)
        .bind(job.lease_duration_ms)
        .bind(&job.idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(EnqueueResult::Created(id));
        }

        let key = job
            .idempotency_key
            .as_deref()
            .ok_or_else(|| anyhow!("job insert returned no row"))?;
        match self.find_live_by_idempotency_key(key).await? {
            Some(existing) => Ok(EnqueueResult::Duplicate(existing.id)),
            // The live job finished between our insert and lookup; try again.
            None => self.enqueue(spec).await,
        }
    }

    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE attempt < max_attempts
                  AND (
                    (status = 'pending' AND next_run_at <= NOW())
                    OR (status = 'running' AND lease_expires_at < NOW())
                  )
                ORDER BY next_run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET
                status = 'running',
                attempt = attempt + 1,
                lease_expires_at = NOW() + lease_duration_ms * INTERVAL '1 millisecond',
                worker_id = $2,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(limit)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs.into_iter().map(ClaimedJob::new).collect())
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                lease_expires_at = NULL,
                error_message = NULL,
                error_kind = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let job = self.fetch(job_id).await?;
        let transition = job.failure_transition(kind, &self.retry_policy, Utc::now());

        match transition {
            FailureTransition::Retry { next_run_at } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        next_run_at = $1,
                        lease_expires_at = NULL,
                        worker_id = NULL,
                        error_message = $2,
                        error_kind = $3,
                        updated_at = NOW()
                    WHERE id = $4
                    "#,
                )
                .bind(next_run_at)
                .bind(error)
                .bind(kind)
                .bind(job_id)
                .execute(&self.pool)
                .await?;

                info!(
                    job_id = %job_id,
                    attempt = job.attempt,
                    next_run_at = %next_run_at,
                    "scheduled job retry"
                );
            }
            FailureTransition::Fail | FailureTransition::DeadLetter => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = $1,
                        lease_expires_at = NULL,
                        error_message = $2,
                        error_kind = $3,
                        dead_lettered_at = CASE WHEN $1 = 'dead_letter'::job_status THEN NOW() END,
                        updated_at = NOW()
                    WHERE id = $4
                    "#,
                )
                .bind(transition.status())
                .bind(error)
                .bind(kind)
                .bind(job_id)
                .execute(&self.pool)
                .await?;

                warn!(
                    job_id = %job_id,
                    attempt = job.attempt,
                    status = ?transition.status(),
                    "job failed terminally"
                );
            }
        }

        Ok(())
    }

    async fn release(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempt = GREATEST(attempt - 1, 0),
                lease_expires_at = NULL,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + lease_duration_ms * INTERVAL '1 millisecond',
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_live_by_idempotency_key(&self, key: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE idempotency_key = $1
              AND status IN ('pending', 'running')
            LIMIT 1
            "#
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn find_latest_by_idempotency_key(&self, key: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE idempotency_key = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn dead_letter_abandoned(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead_letter',
                error_message = COALESCE(error_message, 'lease expired on final attempt'),
                error_kind = COALESCE(error_kind, 'retryable'),
                dead_lettered_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND lease_expires_at < NOW()
              AND attempt >= max_attempts
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_terminal(
        &self,
        succeeded_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE (status = 'succeeded' AND updated_at < $1)
               OR (status IN ('failed', 'dead_letter') AND updated_at < $2)
            "#,
        )
        .bind(succeeded_before)
        .bind(failed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
