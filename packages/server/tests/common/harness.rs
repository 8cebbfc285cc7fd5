//! Test harnesses.
//!
//! [`TestApp`] drives the real router and job runner against in-memory
//! stores. [`PostgresHarness`] runs the same code against a Postgres
//! container; the container and migrations are initialized once and shared
//! by every test in the binary.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use server_core::domains::newsletter::jobs::register_jobs;
use server_core::domains::webhooks::{VerificationPolicy, WebhookPolicies};
use server_core::kernel::jobs::{JobRegistry, JobRunner, JobRunnerConfig, PostgresJobQueue};
use server_core::kernel::{ServerDeps, TestDependencies};
use server_core::server::build_app;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use tower::ServiceExt;

use super::{MAILGUN_KEY, SENDGRID_KEY, TEST_USER_ID};

/// Both providers verified with the fixture keys.
pub fn signed_policies() -> WebhookPolicies {
    WebhookPolicies {
        mailgun: VerificationPolicy::hmac(MAILGUN_KEY),
        sendgrid: VerificationPolicy::hmac(SENDGRID_KEY),
    }
}

/// Router, dependencies and job runner over in-memory stores.
pub struct TestApp {
    pub test_deps: TestDependencies,
    pub deps: Arc<ServerDeps>,
    pub router: Router,
}

impl TestApp {
    /// Signed policies and the fixture user registered.
    pub fn new() -> Self {
        Self::build(TestDependencies::new().with_user(TEST_USER_ID), signed_policies())
    }

    pub fn build(test_deps: TestDependencies, policies: WebhookPolicies) -> Self {
        let deps = test_deps.into_deps();
        let router = build_app(deps.clone(), policies);
        Self {
            test_deps,
            deps,
            router,
        }
    }

    pub async fn post_form(&self, path: &str, fields: &[(String, String)]) -> (StatusCode, Value) {
        let body = fields
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");

        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();

        self.send(request).await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        fields: &[(String, String)],
    ) -> (StatusCode, Value) {
        let boundary = "----newsletter-test-boundary";
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        // Attachments are skipped by the decoder.
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"attachment1\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nignored\r\n"
        ));
        body.push_str(&format!("--{boundary}--\r\n"));

        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        self.send(request).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();

        self.send(request).await
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub fn runner(&self) -> JobRunner {
        runner_for(self.deps.clone())
    }

    /// Execute every ready job.
    pub async fn run_jobs(&self) -> usize {
        self.runner().run_until_idle().await.unwrap()
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

pub fn runner_for(deps: Arc<ServerDeps>) -> JobRunner {
    let mut registry = JobRegistry::new();
    register_jobs(&mut registry);

    let config = JobRunnerConfig {
        poll_interval: Duration::from_millis(20),
        ..JobRunnerConfig::with_worker_id("test-runner")
    };
    JobRunner::with_config(deps.job_queue.clone(), Arc::new(registry), deps, config)
}

// =============================================================================
// Postgres
// =============================================================================

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --ignored --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Postgres-backed dependencies. Tests share one database, so each test
/// should use its own user ids and message ids.
pub struct PostgresHarness {
    pub db_pool: PgPool,
    pub deps: Arc<ServerDeps>,
}

impl PostgresHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        let queue = PostgresJobQueue::new(db_pool.clone());
        let deps = Arc::new(ServerDeps::postgres(
            db_pool.clone(),
            queue,
            "newsletters.test".to_string(),
            Duration::from_secs(30),
        ));

        Ok(Self { db_pool, deps })
    }

    pub fn router(&self) -> Router {
        build_app(self.deps.clone(), signed_policies())
    }
}
