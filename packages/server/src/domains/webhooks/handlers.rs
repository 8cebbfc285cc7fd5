//! Inbound email webhook endpoints.
//!
//! Each delivery is authenticated according to the provider's
//! [`VerificationPolicy`], decoded into an [`InboundEmail`] and ingested.
//! Parsing happens later in the background; extraction failures never
//! affect the webhook response.
//!
//! # Response
//!
//! - 200 OK: stored (or already stored)
//! - 400 Bad Request: missing signature parameters, missing fields, bad body
//! - 403 Forbidden: stale timestamp, replayed token, invalid signature
//! - 404 Not Found: recipient is not a known user alias
//! - 422 Unprocessable Entity: email has no content
//! - 503 Service Unavailable: provider not configured, replay ledger down
//! - 500 Internal Server Error: persistence failure

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domains::newsletter::{ingest, InboundEmail, IngestOutcome, ValidationFailure};
use crate::kernel::ServerDeps;

use super::fields::WebhookFields;
use super::provider::{InboundProvider, VerificationPolicy, WebhookPolicies};
use super::signature::{self, VerifyError};

/// State shared with the webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub deps: Arc<ServerDeps>,
    pub policies: Arc<WebhookPolicies>,
}

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("{0} webhooks are not configured")]
    NotConfigured(InboundProvider),

    #[error("missing signature parameters")]
    MissingParameters,

    #[error("unauthorized: {0}")]
    Unauthorized(VerifyError),

    #[error("webhook verification unavailable")]
    LedgerUnavailable,

    #[error("malformed body: {0}")]
    MalformedBody(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(ValidationFailure),

    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl From<VerifyError> for WebhookError {
    fn from(error: VerifyError) -> Self {
        match error {
            VerifyError::MissingParameters => WebhookError::MissingParameters,
            VerifyError::Ledger(_) => WebhookError::LedgerUnavailable,
            other => WebhookError::Unauthorized(other),
        }
    }
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::NotConfigured(_) | WebhookError::LedgerUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            WebhookError::MissingParameters | WebhookError::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::Unauthorized(_) => StatusCode::FORBIDDEN,
            WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::Validation(ValidationFailure::MissingField(_)) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::Validation(ValidationFailure::EmptyContent) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Rejection details stay in the logs.
            WebhookError::Unauthorized(_) => "Invalid webhook signature".to_string(),
            WebhookError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = json!({
            "error": {
                "message": message,
                "statusCode": status.as_u16(),
            }
        });

        (status, Json(body)).into_response()
    }
}

/// Build the axum router for webhook endpoints.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/mailgun", post(handle_mailgun))
        .route("/webhooks/sendgrid", post(handle_sendgrid))
        .with_state(state)
}

async fn handle_mailgun(
    State(state): State<WebhookState>,
    fields: WebhookFields,
) -> Result<Json<Value>, WebhookError> {
    handle_inbound(InboundProvider::Mailgun, &state, &fields).await
}

async fn handle_sendgrid(
    State(state): State<WebhookState>,
    fields: WebhookFields,
) -> Result<Json<Value>, WebhookError> {
    handle_inbound(InboundProvider::SendGrid, &state, &fields).await
}

/// Authenticate, decode and ingest one delivery.
pub async fn handle_inbound(
    provider: InboundProvider,
    state: &WebhookState,
    fields: &WebhookFields,
) -> Result<Json<Value>, WebhookError> {
    authenticate(provider, state, fields).await?;

    let email = provider.decode(fields);
    let outcome = ingest(&email, &state.deps).await.map_err(|e| {
        error!(provider = %provider, error = %e, "failed to ingest inbound email");
        WebhookError::Internal(e)
    })?;

    respond(provider, &email, outcome)
}

async fn authenticate(
    provider: InboundProvider,
    state: &WebhookState,
    fields: &WebhookFields,
) -> Result<(), WebhookError> {
    match state.policies.for_provider(provider) {
        VerificationPolicy::Disabled => {
            warn!(provider = %provider, "webhook received for unconfigured provider");
            Err(WebhookError::NotConfigured(provider))
        }
        VerificationPolicy::TrustedUnsigned => {
            warn!(
                target: "security",
                provider = %provider,
                "accepting unsigned webhook (trusted-unsigned policy)"
            );
            Ok(())
        }
        VerificationPolicy::Hmac { signing_key } => {
            let params = provider.signature_params(fields)?;
            signature::verify(
                &params,
                signing_key.as_bytes(),
                provider.as_str(),
                state.deps.replay_ledger.as_ref(),
            )
            .await
            .map_err(|e| {
                match &e {
                    VerifyError::Ledger(inner) => {
                        error!(provider = %provider, error = %inner, "replay ledger unavailable");
                    }
                    other => {
                        warn!(
                            target: "security",
                            provider = %provider,
                            token = %params.token,
                            reason = %other,
                            "rejected webhook"
                        );
                    }
                }
                WebhookError::from(e)
            })
        }
    }
}

fn respond(
    provider: InboundProvider,
    email: &InboundEmail,
    outcome: IngestOutcome,
) -> Result<Json<Value>, WebhookError> {
    match outcome {
        IngestOutcome::Accepted {
            newsletter_id,
            job_id,
        } => {
            info!(
                provider = %provider,
                newsletter_id = %newsletter_id,
                job_id = ?job_id,
                "inbound email accepted"
            );
            Ok(Json(json!({ "success": true })))
        }
        IngestOutcome::Duplicate { message_id } => {
            info!(provider = %provider, message_id = %message_id, "duplicate inbound email");
            Ok(Json(json!({ "success": true })))
        }
        IngestOutcome::UnknownAlias { recipient } => Err(WebhookError::NotFound(format!(
            "Invalid email alias: {}",
            recipient
        ))),
        IngestOutcome::UnknownUser { user_id } => {
            Err(WebhookError::NotFound(format!("User not found: {}", user_id)))
        }
        IngestOutcome::Invalid(failure) => {
            warn!(
                provider = %provider,
                recipient = ?email.recipient,
                reason = %failure,
                "rejected inbound email"
            );
            Err(WebhookError::Validation(failure))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_error_mapping() {
        assert_eq!(
            WebhookError::from(VerifyError::MissingParameters).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::from(VerifyError::InvalidSignature).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WebhookError::from(VerifyError::StaleTimestamp { skew_secs: 400 }).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WebhookError::from(VerifyError::ReplayedToken).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WebhookError::from(VerifyError::Ledger(anyhow::anyhow!("down"))).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_validation_statuses() {
        assert_eq!(
            WebhookError::Validation(ValidationFailure::EmptyContent).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            WebhookError::Validation(ValidationFailure::MissingField("recipient")).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
