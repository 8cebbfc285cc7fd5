//! Job runner service for processing background jobs.
//!
//! The `JobRunner` is a background service that:
//! - Claims ready jobs while it has free concurrency slots
//! - Starts at most `max_starts_per_second` jobs per second
//! - Executes jobs via the registry, heartbeating their leases
//! - Records success/failure (the queue decides on retries)
//!
//! # Architecture
//!
//! ```text
//! JobRunner
//!     │
//!     ├─► Wait for a concurrency permit
//!     ├─► Claim jobs (JobQueue)
//!     ├─► Wait for the start-rate limiter
//!     ├─► Spawn: execute via JobRegistry with heartbeat + timeout
//!     └─► Mark succeeded/failed (JobQueue handles retries)
//! ```
//!
//! # Shutdown
//!
//! When the shutdown token fires the runner stops claiming, releases jobs it
//! claimed but had not started, and waits up to `shutdown_grace` for running
//! jobs. Jobs still running after that are aborted and keep their `running`
//! status; their lease expires and another worker reclaims them.

use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{classify_error, JobFailure};
use super::queue::{ClaimedJob, JobQueue};
use super::registry::SharedJobRegistry;
use crate::kernel::ServerDeps;

/// Configuration for the job runner.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Worker ID for this instance
    pub worker_id: String,
    /// Maximum jobs executing at once
    pub concurrency: usize,
    /// Maximum job starts per second
    pub max_starts_per_second: u32,
    /// How long to wait when no jobs are available
    pub poll_interval: Duration,
    /// How often running jobs extend their lease
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for running jobs before aborting them
    pub shutdown_grace: Duration,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("runner-{}", Uuid::new_v4()),
            concurrency: 5,
            max_starts_per_second: 10,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(20),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl JobRunnerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// Background service that processes jobs from the queue.
pub struct JobRunner {
    job_queue: Arc<dyn JobQueue>,
    registry: SharedJobRegistry,
    deps: Arc<ServerDeps>,
    config: JobRunnerConfig,
}

impl JobRunner {
    /// Create a new job runner.
    pub fn new(
        job_queue: Arc<dyn JobQueue>,
        registry: SharedJobRegistry,
        deps: Arc<ServerDeps>,
    ) -> Self {
        Self::with_config(job_queue, registry, deps, JobRunnerConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(
        job_queue: Arc<dyn JobQueue>,
        registry: SharedJobRegistry,
        deps: Arc<ServerDeps>,
        config: JobRunnerConfig,
    ) -> Self {
        Self {
            job_queue,
            registry,
            deps,
            config,
        }
    }

    pub fn config(&self) -> &JobRunnerConfig {
        &self.config
    }

    fn execution(&self) -> Execution {
        Execution {
            job_queue: self.job_queue.clone(),
            registry: self.registry.clone(),
            deps: self.deps.clone(),
            heartbeat_interval: self.config.heartbeat_interval,
        }
    }

    /// Run the job runner until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        let starts = NonZeroU32::new(self.config.max_starts_per_second).unwrap_or(nonzero!(1u32));
        let limiter: DefaultDirectRateLimiter = RateLimiter::direct(Quota::per_second(starts));
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        info!(
            worker_id = %self.config.worker_id,
            concurrency,
            max_starts_per_second = starts.get(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "job runner starting"
        );

        'claim: loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join_result(joined);
            }

            let first_permit = tokio::select! {
                _ = shutdown.cancelled() => break 'claim,
                permit = permits.clone().acquire_owned() => permit?,
            };

            let limit = (permits.available_permits() + 1) as i64;
            let jobs = match self.job_queue.claim(&self.config.worker_id, limit).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    drop(first_permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break 'claim,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue 'claim,
                    }
                }
            };

            if jobs.is_empty() {
                drop(first_permit);
                tokio::select! {
                    _ = shutdown.cancelled() => break 'claim,
                    _ = tokio::time::sleep(self.config.poll_interval) => continue 'claim,
                }
            }

            debug!(count = jobs.len(), "claimed jobs");

            let mut first_permit = Some(first_permit);
            let mut pending = jobs.into_iter();
            while let Some(job) = pending.next() {
                let permit = match first_permit.take() {
                    Some(permit) => permit,
                    None => match permits.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.release_all(std::iter::once(job).chain(pending)).await;
                            continue 'claim;
                        }
                    },
                };

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        self.release_all(std::iter::once(job).chain(pending)).await;
                        break 'claim;
                    }
                    _ = limiter.until_ready() => {}
                }

                let execution = self.execution();
                tasks.spawn(async move {
                    execution.run(job).await;
                    drop(permit);
                });
            }
        }

        if !tasks.is_empty() {
            info!(
                count = tasks.len(),
                grace_secs = self.config.shutdown_grace.as_secs(),
                "waiting for running jobs to complete"
            );

            let drain = async {
                while let Some(joined) = tasks.join_next().await {
                    log_join_result(joined);
                }
            };

            if tokio::time::timeout(self.config.shutdown_grace, drain)
                .await
                .is_err()
            {
                warn!(
                    count = tasks.len(),
                    "shutdown grace elapsed, abandoning running jobs to lease expiry"
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
            }
        }

        info!(worker_id = %self.config.worker_id, "job runner stopped");
        Ok(())
    }

    /// Claim and execute ready jobs one at a time until none are ready.
    ///
    /// Returns how many jobs were executed. Jobs waiting out a retry backoff
    /// are not ready and are left alone.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let execution = self.execution();
        let mut executed = 0;

        loop {
            let jobs = self.job_queue.claim(&self.config.worker_id, 1).await?;
            if jobs.is_empty() {
                return Ok(executed);
            }
            for job in jobs {
                execution.run(job).await;
                executed += 1;
            }
        }
    }

    async fn release_all(&self, jobs: impl Iterator<Item = ClaimedJob>) {
        for job in jobs {
            if let Err(e) = self.job_queue.release(job.id).await {
                error!(job_id = %job.id, error = %e, "failed to release unstarted job");
            }
        }
    }
}

fn log_join_result(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "job task panicked");
        }
    }
}

/// Everything a spawned job task needs.
#[derive(Clone)]
struct Execution {
    job_queue: Arc<dyn JobQueue>,
    registry: SharedJobRegistry,
    deps: Arc<ServerDeps>,
    heartbeat_interval: Duration,
}

impl Execution {
    async fn run(&self, job: ClaimedJob) {
        let job_id = job.id;
        let job_type = job.command_type().to_string();
        let attempt = job.job.attempt;
        let timeout = job.job.timeout();

        debug!(job_id = %job_id, job_type = %job_type, attempt, "executing job");

        let result = self.execute_with_heartbeat(&job, timeout).await;

        match result {
            Ok(()) => {
                info!(job_id = %job_id, job_type = %job_type, attempt, "job succeeded");
                if let Err(e) = self.job_queue.mark_succeeded(job_id).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job as succeeded");
                }
            }
            Err(e) => {
                let error_kind = classify_error(&e);
                warn!(
                    job_id = %job_id,
                    job_type = %job_type,
                    attempt,
                    error_kind = ?error_kind,
                    error = %e,
                    "job failed"
                );

                if let Err(mark_err) = self
                    .job_queue
                    .mark_failed(job_id, &format!("{:#}", e), error_kind)
                    .await
                {
                    error!(job_id = %job_id, error = %mark_err, "failed to mark job as failed");
                }
            }
        }
    }

    /// Execute a job, extending its lease while it runs.
    ///
    /// The heartbeat shares the job's task, so aborting the task also stops
    /// the heartbeat and lets the lease lapse.
    async fn execute_with_heartbeat(&self, job: &ClaimedJob, timeout: Duration) -> Result<()> {
        let work = AssertUnwindSafe(self.registry.execute(job, self.deps.clone())).catch_unwind();
        let work = tokio::time::timeout(timeout, work);
        tokio::pin!(work);

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                outcome = &mut work => {
                    return match outcome {
                        Ok(Ok(result)) => result,
                        Ok(Err(_panic)) => Err(anyhow::anyhow!("job handler panicked")),
                        Err(_elapsed) => Err(JobFailure::TimedOut(timeout).into()),
                    };
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.job_queue.heartbeat(job.id).await {
                        warn!(job_id = %job.id, error = %e, "heartbeat failed");
                    }
                }
            }
        }
    }
}
