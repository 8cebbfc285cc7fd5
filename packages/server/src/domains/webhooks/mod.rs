// Webhooks domain - authenticated inbound email endpoints
//
// Responsibilities:
// - Decoding provider payloads (multipart, url-encoded, JSON)
// - Signature, timestamp and replay verification
// - Mapping ingestion outcomes to HTTP responses

pub mod fields;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod signature;

pub use fields::WebhookFields;
pub use handlers::{router, WebhookError, WebhookState};
pub use provider::{InboundProvider, VerificationPolicy, WebhookPolicies};
pub use signature::{verify, verify_at, SignatureParams, VerifyError};
