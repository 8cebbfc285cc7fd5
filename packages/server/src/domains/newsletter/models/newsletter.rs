use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::subscriptions::{Subscription, SubscriptionSeed};

/// Extraction state of a stored newsletter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "parse_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Pending,
    Success,
    Failed,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// One delivered newsletter email.
///
/// Created `pending` by ingestion with the raw HTML; the parse job fills in
/// the extracted fields and moves it to `success` or `failed`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Newsletter {
    pub id: Uuid,
    pub user_id: String,
    /// Provider message id; unique across the system
    pub message_id: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    /// Raw HTML (or plain text when the email had no HTML part)
    pub html_content: String,
    /// Sanitized article HTML, empty until parsed
    pub clean_content: String,
    pub text_content: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub publication: Option<String>,
    pub excerpt: Option<String>,
    pub estimated_read_time: Option<i32>,
    pub parse_status: ParseStatus,
    pub parse_error: Option<String>,
    pub parsed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything ingestion writes for one accepted delivery.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub user_id: String,
    pub message_id: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub html_content: String,
    pub text_content: Option<String>,
    pub received_at: DateTime<Utc>,
    pub subscription: SubscriptionSeed,
}

/// Result of recording a delivery.
#[derive(Debug, Clone)]
pub enum DeliveryRecord {
    Created {
        newsletter: Newsletter,
        subscription: Subscription,
    },
    /// Another delivery with the same message id was stored first
    Duplicate,
}

/// Fields written by a successful parse.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFields {
    pub title: String,
    pub author: Option<String>,
    pub publication: Option<String>,
    pub clean_content: String,
    pub text_content: String,
    pub excerpt: Option<String>,
    pub estimated_read_time: i32,
}

impl Newsletter {
    /// The pending row a delivery creates.
    pub fn pending(delivery: &NewDelivery) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: delivery.user_id.clone(),
            message_id: delivery.message_id.clone(),
            from_email: delivery.from_email.clone(),
            from_name: delivery.from_name.clone(),
            subject: delivery.subject.clone(),
            received_at: delivery.received_at,
            html_content: delivery.html_content.clone(),
            clean_content: String::new(),
            text_content: delivery.text_content.clone(),
            title: None,
            author: None,
            publication: None,
            excerpt: None,
            estimated_read_time: None,
            parse_status: ParseStatus::Pending,
            parse_error: None,
            parsed_at: None,
            created_at: delivery.received_at,
            updated_at: delivery.received_at,
        }
    }

    /// Apply a successful parse.
    pub fn apply_parsed(&mut self, fields: &ParsedFields, now: DateTime<Utc>) {
        self.title = Some(fields.title.clone());
        self.author = fields.author.clone();
        self.publication = fields.publication.clone();
        self.clean_content = fields.clean_content.clone();
        self.text_content = Some(fields.text_content.clone());
        self.excerpt = fields.excerpt.clone();
        self.estimated_read_time = Some(fields.estimated_read_time);
        self.parse_status = ParseStatus::Success;
        self.parse_error = None;
        self.parsed_at = Some(now);
        self.updated_at = now;
    }

    /// Apply a failed parse attempt.
    pub fn apply_failure(&mut self, error: &str, now: DateTime<Utc>) {
        self.parse_status = ParseStatus::Failed;
        self.parse_error = Some(error.to_string());
        self.updated_at = now;
    }

    // =========================================================================
    // SQL Queries
    // =========================================================================

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM newsletters WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_message_id(message_id: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM newsletters WHERE message_id = $1")
            .bind(message_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Insert the newsletter and upsert its subscription in one transaction.
    ///
    /// A unique violation on `message_id` means a concurrent delivery won the
    /// race; the transaction is rolled back and `Duplicate` returned.
    pub async fn record_delivery(delivery: &NewDelivery, pool: &PgPool) -> Result<DeliveryRecord> {
        let pending = Self::pending(delivery);
        let mut tx = pool.begin().await?;

        let newsletter = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO newsletters (
                id, user_id, message_id, from_email, from_name, subject,
                received_at, html_content, clean_content, text_content, parse_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, '', $9, 'pending')
            ON CONFLICT (message_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(pending.id)
        .bind(&pending.user_id)
        .bind(&pending.message_id)
        .bind(&pending.from_email)
        .bind(&pending.from_name)
        .bind(&pending.subject)
        .bind(pending.received_at)
        .bind(&pending.html_content)
        .bind(&pending.text_content)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(newsletter) = newsletter else {
            tx.rollback().await?;
            return Ok(DeliveryRecord::Duplicate);
        };

        let subscription =
            Subscription::upsert_for_delivery(&delivery.subscription, delivery.received_at, &mut tx)
                .await?;

        tx.commit().await?;

        Ok(DeliveryRecord::Created {
            newsletter,
            subscription,
        })
    }

    pub async fn mark_parsed(id: Uuid, fields: &ParsedFields, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE newsletters
            SET title = $2,
                author = $3,
                publication = $4,
                clean_content = $5,
                text_content = $6,
                excerpt = $7,
                estimated_read_time = $8,
                parse_status = 'success',
                parse_error = NULL,
                parsed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&fields.title)
        .bind(&fields.author)
        .bind(&fields.publication)
        .bind(&fields.clean_content)
        .bind(&fields.text_content)
        .bind(&fields.excerpt)
        .bind(fields.estimated_read_time)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn mark_failed(id: Uuid, error: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE newsletters
            SET parse_status = 'failed',
                parse_error = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Pending newsletters received before `older_than`, oldest first.
    pub async fn find_stale_pending(
        older_than: DateTime<Utc>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM newsletters
            WHERE parse_status = 'pending'
              AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> NewDelivery {
        NewDelivery {
            user_id: "abc".to_string(),
            message_id: "<m1@example.com>".to_string(),
            from_email: "news@example.com".to_string(),
            from_name: Some("News".to_string()),
            subject: "Issue 1".to_string(),
            html_content: "<p>Hello</p>".to_string(),
            text_content: Some("Hello".to_string()),
            received_at: Utc::now(),
            subscription: SubscriptionSeed {
                user_id: "abc".to_string(),
                sender_email: "news@example.com".to_string(),
                sender_domain: Some("example.com".to_string()),
                newsletter_name: "News".to_string(),
            },
        }
    }

    #[test]
    fn test_pending_newsletter() {
        let newsletter = Newsletter::pending(&delivery());
        assert_eq!(newsletter.parse_status, ParseStatus::Pending);
        assert!(newsletter.clean_content.is_empty());
        assert!(newsletter.parsed_at.is_none());
    }

    #[test]
    fn test_apply_parsed_clears_error() {
        let mut newsletter = Newsletter::pending(&delivery());
        let now = Utc::now();
        newsletter.apply_failure("timeout", now);
        assert_eq!(newsletter.parse_status, ParseStatus::Failed);

        newsletter.apply_parsed(
            &ParsedFields {
                title: "Issue 1".to_string(),
                author: None,
                publication: Some("Example".to_string()),
                clean_content: "<div><p>Hello</p></div>".to_string(),
                text_content: "Hello".to_string(),
                excerpt: Some("Hello".to_string()),
                estimated_read_time: 1,
            },
            now,
        );
        assert_eq!(newsletter.parse_status, ParseStatus::Success);
        assert_eq!(newsletter.parse_error, None);
        assert_eq!(newsletter.parsed_at, Some(now));
        assert_eq!(newsletter.estimated_read_time, Some(1));
    }

    #[test]
    fn test_parse_status_as_str() {
        assert_eq!(ParseStatus::Pending.as_str(), "pending");
        assert_eq!(ParseStatus::Failed.as_str(), "failed");
    }
}
