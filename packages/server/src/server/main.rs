// Main entry point for the newsletter ingestion server

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::domains::newsletter::jobs::register_jobs;
use server_core::kernel::jobs::{
    JobRegistry, JobRunner, JobRunnerConfig, PostgresJobQueue, RetryPolicy,
};
use server_core::kernel::{start_scheduler, ServerDeps};
use server_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting newsletter ingestion server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let job_queue = PostgresJobQueue::new(pool.clone())
        .with_max_attempts(config.job_max_attempts)
        .with_retry_policy(RetryPolicy::with_base_delay(config.job_backoff_base));

    let deps = Arc::new(ServerDeps::postgres(
        pool,
        job_queue,
        config.email_alias_domain.clone(),
        config.extraction_timeout,
    ));

    let shutdown = CancellationToken::new();

    // Job runner
    let mut registry = JobRegistry::new();
    register_jobs(&mut registry);

    let runner_config = JobRunnerConfig {
        concurrency: config.worker_concurrency,
        max_starts_per_second: config.worker_max_starts_per_second,
        shutdown_grace: config.shutdown_grace,
        ..Default::default()
    };
    let runner = JobRunner::with_config(
        deps.job_queue.clone(),
        Arc::new(registry),
        deps.clone(),
        runner_config,
    );
    let runner_handle = tokio::spawn(runner.run(shutdown.clone()));

    // Scheduled tasks
    let reconcile_after = chrono::Duration::from_std(config.reconcile_after)
        .context("RECONCILE_AFTER_SECS is out of range")?;
    let mut scheduler = start_scheduler(deps.clone(), reconcile_after)
        .await
        .context("Failed to start scheduler")?;

    // Build application
    let app = build_app(deps, config.webhook_policies());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    tokio::spawn(watch_signals(shutdown.clone()));

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("Server error")?;

    tracing::info!("HTTP server stopped, draining background work");

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "scheduler shutdown failed");
    }

    match runner_handle.await {
        Ok(Ok(())) => tracing::info!("Job runner stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Job runner exited with error"),
        Err(e) => tracing::error!(error = %e, "Job runner task panicked"),
    }

    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    shutdown.cancel();
}
