use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Aggregate of every newsletter a user has received from one sender.
///
/// Exactly one row exists per (user_id, sender_email). The row is created by
/// the first delivery and `email_count` is incremented by each later one, in
/// the same transaction as the newsletter insert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: String,
    pub newsletter_name: String,
    pub sender_email: String,
    pub sender_domain: Option<String>,
    pub email_count: i32,
    pub last_received_at: DateTime<Utc>,
    pub is_active: bool,
    pub subscribed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values used when a delivery creates a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionSeed {
    pub user_id: String,
    pub sender_email: String,
    pub sender_domain: Option<String>,
    pub newsletter_name: String,
}

impl Subscription {
    /// First subscription row for a sender, as created by its first delivery.
    pub fn first_delivery(seed: &SubscriptionSeed, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: seed.user_id.clone(),
            newsletter_name: seed.newsletter_name.clone(),
            sender_email: seed.sender_email.clone(),
            sender_domain: seed.sender_domain.clone(),
            email_count: 1,
            last_received_at: received_at,
            is_active: true,
            subscribed_at: received_at,
            created_at: received_at,
            updated_at: received_at,
        }
    }

    /// Apply a later delivery from the same sender.
    pub fn record_delivery(&mut self, received_at: DateTime<Utc>) {
        self.email_count += 1;
        self.last_received_at = received_at;
        self.updated_at = received_at;
    }

    pub async fn find(user_id: &str, sender_email: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND sender_email = $2",
        )
        .bind(user_id)
        .bind(sender_email)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Create the subscription or count one more delivery, inside the caller's
    /// transaction.
    pub async fn upsert_for_delivery(
        seed: &SubscriptionSeed,
        received_at: DateTime<Utc>,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO subscriptions (
                id, user_id, newsletter_name, sender_email, sender_domain,
                email_count, last_received_at, subscribed_at
            )
            VALUES ($1, $2, $3, $4, $5, 1, $6, $6)
            ON CONFLICT (user_id, sender_email) DO UPDATE
            SET email_count = subscriptions.email_count + 1,
                last_received_at = EXCLUDED.last_received_at,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&seed.user_id)
        .bind(&seed.newsletter_name)
        .bind(&seed.sender_email)
        .bind(&seed.sender_domain)
        .bind(received_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> SubscriptionSeed {
        SubscriptionSeed {
            user_id: "abc".to_string(),
            sender_email: "news@example.com".to_string(),
            sender_domain: Some("example.com".to_string()),
            newsletter_name: "News".to_string(),
        }
    }

    #[test]
    fn test_first_delivery_starts_count_at_one() {
        let now = Utc::now();
        let subscription = Subscription::first_delivery(&seed(), now);
        assert_eq!(subscription.email_count, 1);
        assert!(subscription.is_active);
        assert_eq!(subscription.subscribed_at, now);
    }

    #[test]
    fn test_record_delivery_increments() {
        let start = Utc::now();
        let mut subscription = Subscription::first_delivery(&seed(), start);
        let later = start + chrono::Duration::minutes(5);
        subscription.record_delivery(later);
        subscription.record_delivery(later);
        assert_eq!(subscription.email_count, 3);
        assert_eq!(subscription.last_received_at, later);
        assert_eq!(subscription.subscribed_at, start);
    }
}
