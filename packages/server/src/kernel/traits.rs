// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (ingestion, parsing) lives in domain functions that use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseNewsletterStore, BaseReplayLedger)

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domains::newsletter::models::{DeliveryRecord, NewDelivery, Newsletter, ParsedFields};
use crate::domains::subscriptions::Subscription;
use crate::domains::users::User;

// =============================================================================
// Newsletter Store Trait (Persistence)
// =============================================================================

#[async_trait]
pub trait BaseNewsletterStore: Send + Sync {
    async fn find_newsletter(&self, id: Uuid) -> Result<Option<Newsletter>>;

    async fn find_by_message_id(&self, message_id: &str) -> Result<Option<Newsletter>>;

    /// Insert a pending newsletter and create or increment its subscription,
    /// atomically. Returns `Duplicate` when the message id already exists.
    async fn record_delivery(&self, delivery: &NewDelivery) -> Result<DeliveryRecord>;

    /// Store parsed fields and mark the newsletter `success`.
    /// Returns `None` when the newsletter does not exist.
    async fn mark_parsed(&self, id: Uuid, fields: &ParsedFields) -> Result<Option<Newsletter>>;

    /// Mark the newsletter `failed` with the error message.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<Option<Newsletter>>;

    /// Pending newsletters created before `older_than`, oldest first.
    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Newsletter>>;
}

// =============================================================================
// Subscription Store Trait (Persistence)
// =============================================================================

#[async_trait]
pub trait BaseSubscriptionStore: Send + Sync {
    async fn find_subscription(
        &self,
        user_id: &str,
        sender_email: &str,
    ) -> Result<Option<Subscription>>;
}

// =============================================================================
// User Store Trait (Persistence)
// =============================================================================

#[async_trait]
pub trait BaseUserStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Create the user unless it exists. Returns the user and whether it was
    /// created by this call.
    async fn register_user(&self, user_id: &str, email_alias: &str) -> Result<(User, bool)>;
}

// =============================================================================
// Replay Ledger Trait (Infrastructure - one-time webhook tokens)
// =============================================================================

#[async_trait]
pub trait BaseReplayLedger: Send + Sync {
    /// Whether `key` was recorded and has not expired.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Record `key` for `ttl`, overwriting any previous entry.
    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Atomically record `key` for `ttl` unless an unexpired entry exists.
    /// Returns true when this call recorded it.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}
