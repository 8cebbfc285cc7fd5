//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::domains::webhooks::{self, WebhookPolicies, WebhookState};
use crate::kernel::ServerDeps;
use crate::server::routes::health_handler;

/// Largest accepted request body. Inbound emails with inline images run large.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ServerDeps>,
}

/// Build the Axum application router
///
/// Background processing (job runner, scheduler) is started separately by
/// the binary so tests can drive the router on its own.
pub fn build_app(deps: Arc<ServerDeps>, policies: WebhookPolicies) -> Router {
    for (provider, policy) in [
        ("mailgun", &policies.mailgun),
        ("sendgrid", &policies.sendgrid),
    ] {
        match policy {
            webhooks::VerificationPolicy::TrustedUnsigned => tracing::warn!(
                target: "security",
                provider,
                "webhook signature verification DISABLED (trusted-unsigned)"
            ),
            webhooks::VerificationPolicy::Disabled => {
                tracing::info!(provider, "webhook provider not configured")
            }
            webhooks::VerificationPolicy::Hmac { .. } => {
                tracing::info!(provider, "webhook signature verification enabled")
            }
        }
    }

    let webhook_state = WebhookState {
        deps: deps.clone(),
        policies: Arc::new(policies),
    };

    // Providers post server-to-server; browsers only hit /health.
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .with_state(AppState { deps })
        .merge(webhooks::router(webhook_state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
