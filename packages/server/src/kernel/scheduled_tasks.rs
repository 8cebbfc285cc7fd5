//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Scheduled tasks run independently of the job runner. They repair state
//! the request path cannot: lost parse jobs, expired replay tokens, jobs
//! abandoned on their final attempt and old finished jobs.
//!
//! ```text
//! Scheduler (every 5 minutes)
//!     └─► reconcile_pending()  → enqueue ParseEmailJob for stale newsletters,
//!                                or mark them failed if their job is dead
//!
//! Scheduler (hourly)
//!     ├─► purge_expired()          → drop expired replay tokens
//!     ├─► dead_letter_abandoned()  → close out jobs whose final lease expired
//!     └─► purge_terminal()         → delete succeeded jobs after a day,
//!                                    failed and dead-lettered after a week
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::newsletter::jobs::reconcile_pending;
use crate::kernel::ServerDeps;

const RECONCILE_SCHEDULE: &str = "0 */5 * * * *";
const MAINTENANCE_SCHEDULE: &str = "0 0 * * * *";

/// Hours finished jobs are kept before maintenance deletes them.
pub const SUCCEEDED_JOB_RETENTION_HOURS: i64 = 24;
pub const FAILED_JOB_RETENTION_HOURS: i64 = 7 * 24;

/// Start all scheduled tasks
pub async fn start_scheduler(
    deps: Arc<ServerDeps>,
    reconcile_after: chrono::Duration,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let reconcile_deps = deps.clone();
    let reconcile_job = Job::new_async(RECONCILE_SCHEDULE, move |_uuid, _lock| {
        let deps = reconcile_deps.clone();
        Box::pin(async move {
            if let Err(e) = run_reconcile(&deps, reconcile_after).await {
                tracing::error!(error = %e, "reconcile task failed");
            }
        })
    })?;

    scheduler.add(reconcile_job).await?;

    let maintenance_deps = deps.clone();
    let maintenance_job = Job::new_async(MAINTENANCE_SCHEDULE, move |_uuid, _lock| {
        let deps = maintenance_deps.clone();
        Box::pin(async move {
            if let Err(e) = run_maintenance(&deps).await {
                tracing::error!(error = %e, "maintenance task failed");
            }
        })
    })?;

    scheduler.add(maintenance_job).await?;
    scheduler.start().await?;

    tracing::info!(
        "Scheduled tasks started (reconcile every 5 minutes, queue maintenance hourly)"
    );
    Ok(scheduler)
}

/// Re-enqueue parse jobs for newsletters stuck in `pending`, or fail them when
/// their last job already gave up.
pub async fn run_reconcile(deps: &ServerDeps, older_than: chrono::Duration) -> Result<()> {
    let report = reconcile_pending(deps, older_than).await?;

    if report.requeued > 0 || report.failed > 0 {
        tracing::info!(
            examined = report.examined,
            requeued = report.requeued,
            failed = report.failed,
            "reconcile complete"
        );
    } else {
        tracing::debug!(examined = report.examined, "reconcile found nothing to requeue");
    }

    Ok(())
}

/// Purge expired replay tokens, dead-letter abandoned jobs and delete
/// finished jobs past their retention.
pub async fn run_maintenance(deps: &ServerDeps) -> Result<()> {
    let purged = deps.replay_ledger.purge_expired().await?;
    let dead_lettered = deps.job_queue.dead_letter_abandoned().await?;

    let now = chrono::Utc::now();
    let deleted = deps
        .job_queue
        .purge_terminal(
            now - chrono::Duration::hours(SUCCEEDED_JOB_RETENTION_HOURS),
            now - chrono::Duration::hours(FAILED_JOB_RETENTION_HOURS),
        )
        .await?;

    tracing::info!(
        purged_tokens = purged,
        dead_lettered_jobs = dead_lettered,
        deleted_jobs = deleted,
        "maintenance complete"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{ErrorKind, JobQueue, JobSpec};
    use crate::kernel::test_dependencies::TestDependencies;
    use crate::kernel::BaseReplayLedger;
    use std::time::Duration;

    fn spec() -> JobSpec {
        JobSpec {
            job_type: "parse_email".to_string(),
            args: serde_json::json!({}),
            reference_id: None,
            idempotency_key: None,
            max_attempts: None,
            timeout_ms: None,
            run_at: None,
        }
    }

    #[tokio::test]
    async fn test_maintenance_purges_expired_tokens() {
        let test_deps = TestDependencies::new();
        let deps = test_deps.into_deps();

        deps.replay_ledger
            .set_with_ttl("mailgun:old", Duration::ZERO)
            .await
            .unwrap();
        deps.replay_ledger
            .set_with_ttl("mailgun:fresh", Duration::from_secs(600))
            .await
            .unwrap();

        run_maintenance(&deps).await.unwrap();

        assert!(!deps.replay_ledger.exists("mailgun:old").await.unwrap());
        assert!(deps.replay_ledger.exists("mailgun:fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_maintenance_surfaces_ledger_failure() {
        let test_deps = TestDependencies::new();
        test_deps.store.set_ledger_unavailable(true);
        let deps = test_deps.into_deps();

        assert!(run_maintenance(&deps).await.is_err());
    }

    #[tokio::test]
    async fn test_maintenance_deletes_finished_jobs_past_retention() {
        let test_deps = TestDependencies::new();
        let deps = test_deps.into_deps();
        let queue = test_deps.job_queue.clone();
        let two_days = Duration::from_secs(2 * 24 * 3600);

        let old_done = queue.enqueue(spec()).await.unwrap().job_id();
        let recent_done = queue.enqueue(spec()).await.unwrap().job_id();
        let old_failed = queue.enqueue(spec()).await.unwrap().job_id();
        assert_eq!(queue.claim("w", 3).await.unwrap().len(), 3);
        let waiting = queue.enqueue(spec()).await.unwrap().job_id();

        queue.mark_succeeded(old_done).await.unwrap();
        queue.mark_succeeded(recent_done).await.unwrap();
        queue
            .mark_failed(old_failed, "bad", ErrorKind::NonRetryable)
            .await
            .unwrap();
        queue.backdate(old_done, two_days).await;
        queue.backdate(old_failed, two_days).await;
        queue.backdate(waiting, two_days).await;

        run_maintenance(&deps).await.unwrap();

        assert!(queue.find_job(old_done).await.unwrap().is_none());
        assert!(queue.find_job(recent_done).await.unwrap().is_some());
        // Failed jobs are kept for a week.
        assert!(queue.find_job(old_failed).await.unwrap().is_some());
        assert!(queue.find_job(waiting).await.unwrap().is_some());
    }
}
