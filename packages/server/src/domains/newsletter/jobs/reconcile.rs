//! Re-enqueue newsletters whose parse job was lost.
//!
//! Ingestion commits the newsletter before enqueueing its parse job. If the
//! enqueue fails, or the job is lost, the newsletter stays `pending` forever.
//! This sweep finds old pending newsletters with no live job and enqueues
//! them again. A newsletter whose last job already ended in failure (for
//! example dead-lettered after its worker vanished) is marked failed instead.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::parse_email::ParseEmailJob;
use crate::kernel::jobs::{enqueue_command, JobStatus};
use crate::kernel::ServerDeps;

/// Most newsletters examined per sweep.
pub const RECONCILE_BATCH: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub requeued: usize,
    pub failed: usize,
}

pub async fn reconcile_pending(
    deps: &ServerDeps,
    older_than: chrono::Duration,
) -> Result<ReconcileReport> {
    let cutoff = Utc::now() - older_than;
    let stale = deps
        .newsletters
        .find_stale_pending(cutoff, RECONCILE_BATCH)
        .await?;

    let mut report = ReconcileReport {
        examined: stale.len(),
        ..Default::default()
    };

    for newsletter in stale {
        let key = ParseEmailJob::idempotency_key_for(newsletter.id);
        match deps.job_queue.find_latest_by_idempotency_key(&key).await? {
            Some(job) if job.status.is_live() => {
                debug!(newsletter_id = %newsletter.id, "parse job still live");
                continue;
            }
            Some(job) if matches!(job.status, JobStatus::Failed | JobStatus::DeadLetter) => {
                let reason = job
                    .error_message
                    .unwrap_or_else(|| "parse job abandoned".to_string());
                warn!(
                    newsletter_id = %newsletter.id,
                    job_id = %job.id,
                    error = %reason,
                    "parse job ended without updating newsletter"
                );
                deps.newsletters.mark_failed(newsletter.id, &reason).await?;
                report.failed += 1;
                continue;
            }
            _ => {}
        }

        let job = ParseEmailJob {
            newsletter_id: newsletter.id,
            html: newsletter.html_content,
            from_email: newsletter.from_email,
            subject: newsletter.subject,
        };
        let result = enqueue_command(deps.job_queue.as_ref(), &job).await?;
        if result.is_created() {
            info!(
                newsletter_id = %newsletter.id,
                job_id = %result.job_id(),
                "re-enqueued parse job for stale newsletter"
            );
            report.requeued += 1;
        }
    }

    Ok(report)
}
