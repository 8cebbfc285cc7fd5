//! In-memory job queue for tests and local runs without Postgres.
//!
//! Mirrors [`PostgresJobQueue`](super::PostgresJobQueue) semantics: the same
//! claim rules, the same failure transitions, the same idempotency window.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::job::{ErrorKind, FailureTransition, Job, JobStatus, RetryPolicy};
use super::queue::{ClaimedJob, EnqueueResult, JobQueue, JobSpec};

pub struct MemoryJobQueue {
    jobs: Mutex<HashMap<Uuid, Job>>,
    default_max_attempts: i32,
    lease: Duration,
    retry_policy: RetryPolicy,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            default_max_attempts: 3,
            lease: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Snapshot of every job, oldest first.
    pub async fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        jobs
    }

    pub async fn jobs_of_type(&self, job_type: &str) -> Vec<Job> {
        self.all()
            .await
            .into_iter()
            .filter(|job| job.job_type == job_type)
            .collect()
    }

    /// Make every pending job runnable now, skipping backoff delays.
    pub async fn fast_forward(&self) {
        let now = Utc::now();
        for job in self.jobs.lock().await.values_mut() {
            if job.status == JobStatus::Pending && job.next_run_at > now {
                job.next_run_at = now;
            }
        }
    }

    /// Expire the lease on a running job, as if its worker died.
    pub async fn expire_lease(&self, job_id: Uuid) {
        if let Some(job) = self.jobs.lock().await.get_mut(&job_id) {
            job.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }

    /// Push a job's timestamps `age` into the past.
    pub async fn backdate(&self, job_id: Uuid, age: Duration) {
        let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        if let Some(job) = self.jobs.lock().await.get_mut(&job_id) {
            job.created_at = job.created_at - age;
            job.updated_at = job.updated_at - age;
        }
    }

    fn lease_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease).unwrap_or_else(|_| chrono::Duration::seconds(60))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult> {
        let mut jobs = self.jobs.lock().await;

        if let Some(key) = &spec.idempotency_key {
            if let Some(existing) = jobs
                .values()
                .find(|job| job.status.is_live() && job.idempotency_key.as_ref() == Some(key))
            {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let lease_ms = self.lease.as_millis().min(i64::MAX as u128) as i64;
        let job = Job::from_spec(&spec, self.default_max_attempts, lease_ms);
        let id = job.id;
        jobs.insert(id, job);
        Ok(EnqueueResult::Created(id))
    }

    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;

        let mut ready: Vec<&mut Job> = jobs
            .values_mut()
            .filter(|job| job.is_claimable(now))
            .collect();
        ready.sort_by_key(|job| (job.next_run_at, job.id));

        let limit = usize::try_from(limit).unwrap_or(0);
        let claimed = ready
            .into_iter()
            .take(limit)
            .map(|job| {
                job.status = JobStatus::Running;
                job.attempt += 1;
                job.lease_expires_at = Some(now + self.lease_delta());
                job.worker_id = Some(worker_id.to_string());
                job.updated_at = now;
                ClaimedJob::new(job.clone())
            })
            .collect();

        Ok(claimed)
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("job {} not found", job_id))?;
        job.status = JobStatus::Succeeded;
        job.lease_expires_at = None;
        job.error_message = None;
        job.error_kind = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("job {} not found", job_id))?;

        let transition = job.failure_transition(kind, &self.retry_policy, now);
        job.status = transition.status();
        job.lease_expires_at = None;
        job.error_message = Some(error.to_string());
        job.error_kind = Some(kind);
        job.updated_at = now;

        match transition {
            FailureTransition::Retry { next_run_at } => {
                job.next_run_at = next_run_at;
                job.worker_id = None;
            }
            FailureTransition::DeadLetter => job.dead_lettered_at = Some(now),
            FailureTransition::Fail => {}
        }

        Ok(())
    }

    async fn release(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Pending;
                job.attempt = (job.attempt - 1).max(0);
                job.lease_expires_at = None;
                job.worker_id = None;
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let lease = self.lease_delta();
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Running {
                job.lease_expires_at = Some(now + lease);
                job.updated_at = now;
            }
        }
        Ok(())
    }

    async fn find_live_by_idempotency_key(&self, key: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .find(|job| job.status.is_live() && job.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_latest_by_idempotency_key(&self, key: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|job| job.idempotency_key.as_deref() == Some(key))
            .max_by_key(|job| (job.created_at, job.id))
            .cloned())
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn dead_letter_abandoned(&self) -> Result<u64> {
        let now = Utc::now();
        let mut count = 0;
        for job in self.jobs.lock().await.values_mut() {
            let expired = job.lease_expires_at.is_some_and(|lease| lease < now);
            if job.status == JobStatus::Running && expired && job.attempt >= job.max_attempts {
                job.status = JobStatus::DeadLetter;
                job.dead_lettered_at = Some(now);
                job.error_message
                    .get_or_insert_with(|| "lease expired on final attempt".to_string());
                job.error_kind.get_or_insert(ErrorKind::Retryable);
                job.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_terminal(
        &self,
        succeeded_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| match job.status {
            JobStatus::Succeeded => job.updated_at >= succeeded_before,
            JobStatus::Failed | JobStatus::DeadLetter => job.updated_at >= failed_before,
            _ => true,
        });
        Ok((before - jobs.len()) as u64)
    }
}
