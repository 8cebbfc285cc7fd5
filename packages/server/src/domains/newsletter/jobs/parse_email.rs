//! Background extraction of a stored newsletter.
//!
//! Enqueued by ingestion once per newsletter. Each attempt re-runs extraction
//! from the raw HTML in the payload, writes the parsed fields on success, and
//! records the error on failure before handing it back to the runner, which
//! decides whether to retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use extraction::{detect_platform, ArticleContent};

use crate::domains::newsletter::models::ParsedFields;
use crate::kernel::jobs::{CommandMeta, JobFailure};
use crate::kernel::ServerDeps;

pub const UNTITLED: &str = "Untitled Newsletter";

/// Job payload: everything needed to parse one newsletter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseEmailJob {
    pub newsletter_id: Uuid,
    pub html: String,
    pub from_email: String,
    pub subject: String,
}

impl ParseEmailJob {
    pub const JOB_TYPE: &'static str = "parse_email";

    /// Key shared by every enqueue for one newsletter, so a live job is never
    /// duplicated.
    pub fn idempotency_key_for(newsletter_id: Uuid) -> String {
        format!("{}:{}", Self::JOB_TYPE, newsletter_id)
    }
}

impl CommandMeta for ParseEmailJob {
    fn command_type(&self) -> &'static str {
        Self::JOB_TYPE
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(Self::idempotency_key_for(self.newsletter_id))
    }

    fn reference_id(&self) -> Option<Uuid> {
        Some(self.newsletter_id)
    }
}

/// Choose the stored title: extracted, then subject, then a placeholder.
pub fn resolve_title(extracted: Option<&str>, subject: &str) -> String {
    extracted
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .or_else(|| Some(subject.trim()).filter(|s| !s.is_empty()))
        .unwrap_or(UNTITLED)
        .to_string()
}

/// Map an extracted article onto the newsletter columns.
pub fn parsed_fields(article: ArticleContent, subject: &str) -> ParsedFields {
    ParsedFields {
        title: resolve_title(article.title.as_deref(), subject),
        author: article.author,
        publication: article.publication,
        clean_content: article.clean_content,
        text_content: article.text_content,
        excerpt: article.excerpt,
        estimated_read_time: i32::try_from(article.estimated_read_time).unwrap_or(i32::MAX),
    }
}

/// Run extraction for one newsletter.
pub async fn parse_newsletter(job: ParseEmailJob, deps: Arc<ServerDeps>) -> Result<()> {
    let newsletter_id = job.newsletter_id;
    info!(
        newsletter_id = %newsletter_id,
        from_email = %job.from_email,
        subject = %job.subject,
        "starting email parsing job"
    );

    let outcome = extract_article(&job, &deps).await;

    match outcome {
        Ok(article) => {
            let fields = parsed_fields(article, &job.subject);
            let updated = deps.newsletters.mark_parsed(newsletter_id, &fields).await?;
            if updated.is_none() {
                return Err(JobFailure::permanent(format!(
                    "newsletter {} not found",
                    newsletter_id
                ))
                .into());
            }

            info!(
                newsletter_id = %newsletter_id,
                title = %fields.title,
                read_time = fields.estimated_read_time,
                "email parsed successfully"
            );
            Ok(())
        }
        Err(error) => {
            warn!(newsletter_id = %newsletter_id, error = %error, "email parsing failed");
            if let Err(e) = deps
                .newsletters
                .mark_failed(newsletter_id, &error.to_string())
                .await
            {
                error!(newsletter_id = %newsletter_id, error = %e, "failed to record parse error");
            }
            Err(error)
        }
    }
}

/// Extract on a blocking thread, bounded by the configured time limit.
async fn extract_article(job: &ParseEmailJob, deps: &ServerDeps) -> Result<ArticleContent> {
    let html = job.html.clone();
    let from_email = job.from_email.clone();
    let timeout = deps.extraction_timeout;

    let extracted = run_blocking_with_deadline(timeout, move || {
        let platform = detect_platform(&html, &from_email);
        extraction::extract(&html, &from_email).map(|article| (article, platform))
    })
    .await?;

    match extracted {
        Ok((article, platform)) => {
            info!(
                newsletter_id = %job.newsletter_id,
                platform = %platform,
                word_count = article.word_count,
                "extracted article"
            );
            Ok(article)
        }
        Err(error) if error.is_retryable() => Err(error.into()),
        Err(error) => Err(JobFailure::permanent(error.to_string()).into()),
    }
}

/// Run `work` on the blocking pool. Past `deadline` the result is discarded
/// as a timeout, but only after the thread has returned, so the worker's
/// concurrency permit covers the whole run.
async fn run_blocking_with_deadline<T, F>(deadline: Duration, work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(work);

    match tokio::time::timeout(deadline, &mut task).await {
        Ok(joined) => joined.map_err(|e| anyhow!("extraction task failed: {}", e)),
        Err(_) => {
            warn!(
                timeout_secs = deadline.as_secs(),
                "extraction over time, waiting for blocking thread"
            );
            if let Err(e) = task.await {
                warn!(error = %e, "timed out extraction task failed");
            }
            Err(anyhow!("extraction timed out after {}s", deadline.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_deadline_waits_for_blocking_work() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let result = run_blocking_with_deadline(Duration::from_millis(10), move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_returns_value_in_time() {
        let value = run_blocking_with_deadline(Duration::from_secs(5), || 42)
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_idempotency_key() {
        let id = Uuid::now_v7();
        let job = ParseEmailJob {
            newsletter_id: id,
            html: String::new(),
            from_email: String::new(),
            subject: String::new(),
        };
        assert_eq!(job.idempotency_key(), Some(format!("parse_email:{}", id)));
        assert_eq!(job.reference_id(), Some(id));
        assert_eq!(job.command_type(), "parse_email");
    }

    #[test]
    fn test_resolve_title() {
        assert_eq!(resolve_title(Some("Issue 9"), "Subject"), "Issue 9");
        assert_eq!(resolve_title(Some("  "), "Subject"), "Subject");
        assert_eq!(resolve_title(None, "Subject"), "Subject");
        assert_eq!(resolve_title(None, ""), UNTITLED);
    }

    #[test]
    fn test_payload_shape() {
        let id = Uuid::now_v7();
        let job = ParseEmailJob {
            newsletter_id: id,
            html: "<p>x</p>".to_string(),
            from_email: "a@b.com".to_string(),
            subject: "S".to_string(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["newsletter_id"], serde_json::json!(id));
        assert_eq!(value["html"], "<p>x</p>");
        assert_eq!(value["from_email"], "a@b.com");
        assert_eq!(value["subject"], "S");
    }
}
