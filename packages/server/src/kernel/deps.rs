//! Server dependencies for handlers and jobs (using traits for testability)
//!
//! This module provides the central dependency container used by ingestion,
//! the parse job and the HTTP layer. Persistence and the job queue sit behind
//! trait objects so tests can run against in-memory implementations.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::kernel::jobs::{JobQueue, PostgresJobQueue};
use crate::kernel::postgres_store::PostgresStore;
use crate::kernel::{BaseNewsletterStore, BaseReplayLedger, BaseSubscriptionStore, BaseUserStore};

/// Default time limit for extracting one newsletter.
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to handlers and jobs
#[derive(Clone)]
pub struct ServerDeps {
    /// Pool used for health checks. `None` when running on in-memory stores.
    pub db_pool: Option<PgPool>,
    pub newsletters: Arc<dyn BaseNewsletterStore>,
    pub subscriptions: Arc<dyn BaseSubscriptionStore>,
    pub users: Arc<dyn BaseUserStore>,
    pub replay_ledger: Arc<dyn BaseReplayLedger>,
    pub job_queue: Arc<dyn JobQueue>,
    /// Domain of per-user inbound aliases (`u-<id>@<domain>`)
    pub alias_domain: String,
    pub extraction_timeout: Duration,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: Option<PgPool>,
        newsletters: Arc<dyn BaseNewsletterStore>,
        subscriptions: Arc<dyn BaseSubscriptionStore>,
        users: Arc<dyn BaseUserStore>,
        replay_ledger: Arc<dyn BaseReplayLedger>,
        job_queue: Arc<dyn JobQueue>,
        alias_domain: String,
        extraction_timeout: Duration,
    ) -> Self {
        Self {
            db_pool,
            newsletters,
            subscriptions,
            users,
            replay_ledger,
            job_queue,
            alias_domain,
            extraction_timeout,
        }
    }

    /// Wire every store to Postgres.
    pub fn postgres(
        pool: PgPool,
        job_queue: PostgresJobQueue,
        alias_domain: String,
        extraction_timeout: Duration,
    ) -> Self {
        let store = Arc::new(PostgresStore::new(pool.clone()));
        Self::new(
            Some(pool),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(job_queue),
            alias_domain,
            extraction_timeout,
        )
    }
}
