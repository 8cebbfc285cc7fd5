//! Postgres implementations of the persistence traits.
//!
//! Thin adapters over the model query methods; all SQL lives in the models.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::newsletter::models::{DeliveryRecord, NewDelivery, Newsletter, ParsedFields};
use crate::domains::subscriptions::Subscription;
use crate::domains::users::User;
use crate::domains::webhooks::models::WebhookToken;
use crate::kernel::{BaseNewsletterStore, BaseReplayLedger, BaseSubscriptionStore, BaseUserStore};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BaseNewsletterStore for PostgresStore {
    async fn find_newsletter(&self, id: Uuid) -> Result<Option<Newsletter>> {
        Newsletter::find_by_id(id, &self.pool).await
    }

    async fn find_by_message_id(&self, message_id: &str) -> Result<Option<Newsletter>> {
        Newsletter::find_by_message_id(message_id, &self.pool).await
    }

    async fn record_delivery(&self, delivery: &NewDelivery) -> Result<DeliveryRecord> {
        Newsletter::record_delivery(delivery, &self.pool).await
    }

    async fn mark_parsed(&self, id: Uuid, fields: &ParsedFields) -> Result<Option<Newsletter>> {
        Newsletter::mark_parsed(id, fields, &self.pool).await
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<Option<Newsletter>> {
        Newsletter::mark_failed(id, error, &self.pool).await
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Newsletter>> {
        Newsletter::find_stale_pending(older_than, limit, &self.pool).await
    }
}

#[async_trait]
impl BaseSubscriptionStore for PostgresStore {
    async fn find_subscription(
        &self,
        user_id: &str,
        sender_email: &str,
    ) -> Result<Option<Subscription>> {
        Subscription::find(user_id, sender_email, &self.pool).await
    }
}

#[async_trait]
impl BaseUserStore for PostgresStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        User::find_by_user_id(user_id, &self.pool).await
    }

    async fn register_user(&self, user_id: &str, email_alias: &str) -> Result<(User, bool)> {
        User::find_or_create(user_id, email_alias, &self.pool).await
    }
}

#[async_trait]
impl BaseReplayLedger for PostgresStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        WebhookToken::exists(key, &self.pool).await
    }

    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        WebhookToken::set_with_ttl(key, ttl, &self.pool).await
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        WebhookToken::claim(key, ttl, &self.pool).await
    }

    async fn purge_expired(&self) -> Result<u64> {
        WebhookToken::purge_expired(&self.pool).await
    }
}
