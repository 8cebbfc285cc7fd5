// TestDependencies - in-memory implementations for testing
//
// Provides stores and a job queue that can be injected into ServerDeps for
// tests that do not need Postgres.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::deps::DEFAULT_EXTRACTION_TIMEOUT;
use super::jobs::MemoryJobQueue;
use super::{BaseNewsletterStore, BaseReplayLedger, BaseSubscriptionStore, BaseUserStore, ServerDeps};
use crate::domains::newsletter::alias::email_alias;
use crate::domains::newsletter::models::{
    DeliveryRecord, NewDelivery, Newsletter, ParseStatus, ParsedFields,
};
use crate::domains::subscriptions::Subscription;
use crate::domains::users::User;

pub const TEST_ALIAS_DOMAIN: &str = "newsletters.test";

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    newsletters: HashMap<Uuid, Newsletter>,
    subscriptions: HashMap<(String, String), Subscription>,
    tokens: HashMap<String, DateTime<Utc>>,
}

/// One lock over every table, so multi-table writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    ledger_unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a user directly, bypassing the action.
    pub fn insert_user(&self, user_id: &str) -> User {
        let user = User {
            user_id: user_id.to_string(),
            email_alias: email_alias(user_id, TEST_ALIAS_DOMAIN),
            created_at: Utc::now(),
        };
        self.state()
            .users
            .insert(user.user_id.clone(), user.clone());
        user
    }

    /// Make every ledger call fail, as if its backing store were down.
    pub fn set_ledger_unavailable(&self, unavailable: bool) {
        self.ledger_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Move a newsletter's creation time into the past.
    pub fn age_newsletter(&self, id: Uuid, by: chrono::Duration) {
        if let Some(newsletter) = self.state().newsletters.get_mut(&id) {
            newsletter.created_at -= by;
            newsletter.received_at -= by;
        }
    }

    pub fn newsletters(&self) -> Vec<Newsletter> {
        let mut all: Vec<_> = self.state().newsletters.values().cloned().collect();
        all.sort_by_key(|n| n.created_at);
        all
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state().subscriptions.values().cloned().collect()
    }

    fn check_ledger(&self) -> Result<()> {
        if self.ledger_unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("replay ledger unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BaseNewsletterStore for MemoryStore {
    async fn find_newsletter(&self, id: Uuid) -> Result<Option<Newsletter>> {
        Ok(self.state().newsletters.get(&id).cloned())
    }

    async fn find_by_message_id(&self, message_id: &str) -> Result<Option<Newsletter>> {
        Ok(self
            .state()
            .newsletters
            .values()
            .find(|n| n.message_id == message_id)
            .cloned())
    }

    async fn record_delivery(&self, delivery: &NewDelivery) -> Result<DeliveryRecord> {
        let mut state = self.state();

        if state
            .newsletters
            .values()
            .any(|n| n.message_id == delivery.message_id)
        {
            return Ok(DeliveryRecord::Duplicate);
        }

        let newsletter = Newsletter::pending(delivery);
        state.newsletters.insert(newsletter.id, newsletter.clone());

        let seed = &delivery.subscription;
        let key = (seed.user_id.clone(), seed.sender_email.clone());
        let subscription = state
            .subscriptions
            .entry(key)
            .and_modify(|s| s.record_delivery(delivery.received_at))
            .or_insert_with(|| Subscription::first_delivery(seed, delivery.received_at))
            .clone();

        Ok(DeliveryRecord::Created {
            newsletter,
            subscription,
        })
    }

    async fn mark_parsed(&self, id: Uuid, fields: &ParsedFields) -> Result<Option<Newsletter>> {
        Ok(self.state().newsletters.get_mut(&id).map(|newsletter| {
            newsletter.apply_parsed(fields, Utc::now());
            newsletter.clone()
        }))
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<Option<Newsletter>> {
        Ok(self.state().newsletters.get_mut(&id).map(|newsletter| {
            newsletter.apply_failure(error, Utc::now());
            newsletter.clone()
        }))
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Newsletter>> {
        let mut stale: Vec<_> = self
            .state()
            .newsletters
            .values()
            .filter(|n| {
                n.parse_status == ParseStatus::Pending && n.created_at < older_than
            })
            .cloned()
            .collect();
        stale.sort_by_key(|n| n.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}

#[async_trait]
impl BaseSubscriptionStore for MemoryStore {
    async fn find_subscription(
        &self,
        user_id: &str,
        sender_email: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .state()
            .subscriptions
            .get(&(user_id.to_string(), sender_email.to_string()))
            .cloned())
    }
}

#[async_trait]
impl BaseUserStore for MemoryStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.state().users.get(user_id).cloned())
    }

    async fn register_user(&self, user_id: &str, email_alias: &str) -> Result<(User, bool)> {
        let mut state = self.state();
        if let Some(existing) = state.users.get(user_id) {
            return Ok((existing.clone(), false));
        }
        let user = User {
            user_id: user_id.to_string(),
            email_alias: email_alias.to_string(),
            created_at: Utc::now(),
        };
        state.users.insert(user_id.to_string(), user.clone());
        Ok((user, true))
    }
}

#[async_trait]
impl BaseReplayLedger for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_ledger()?;
        let now = Utc::now();
        Ok(self
            .state()
            .tokens
            .get(key)
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        self.check_ledger()?;
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl)?;
        self.state().tokens.insert(key.to_string(), expires_at);
        Ok(())
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_ledger()?;
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl)?;
        let mut state = self.state();

        match state.tokens.get(key) {
            Some(existing) if *existing > now => Ok(false),
            _ => {
                state.tokens.insert(key.to_string(), expires_at);
                Ok(true)
            }
        }
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.check_ledger()?;
        let now = Utc::now();
        let mut state = self.state();
        let before = state.tokens.len();
        state.tokens.retain(|_, expires_at| *expires_at > now);
        Ok((before - state.tokens.len()) as u64)
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub store: Arc<MemoryStore>,
    pub job_queue: Arc<MemoryJobQueue>,
    pub alias_domain: String,
    pub extraction_timeout: Duration,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            job_queue: Arc::new(MemoryJobQueue::new()),
            alias_domain: TEST_ALIAS_DOMAIN.to_string(),
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
        }
    }

    /// Register a user
    pub fn with_user(self, user_id: &str) -> Self {
        self.store.insert_user(user_id);
        self
    }

    /// Set the job queue
    pub fn with_job_queue(mut self, queue: MemoryJobQueue) -> Self {
        self.job_queue = Arc::new(queue);
        self
    }

    /// Set the extraction time limit
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    /// Convert into ServerDeps for testing
    pub fn into_deps(&self) -> Arc<ServerDeps> {
        Arc::new(ServerDeps::new(
            None,
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.job_queue.clone(),
            self.alias_domain.clone(),
            self.extraction_timeout,
        ))
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
