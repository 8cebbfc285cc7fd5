//! Inbound webhook signature and replay verification.
//!
//! Mailgun-style providers sign each delivery with three values: a Unix
//! `timestamp`, a random one-time `token`, and `signature`, the lowercase hex
//! HMAC-SHA256 of `timestamp || token` keyed with the webhook signing key.
//!
//! Verification checks, in order:
//! 1. the timestamp parses and is within [`MAX_TIMESTAMP_SKEW_SECS`] of now
//! 2. the token has not been seen (claimed in the replay ledger for
//!    [`REPLAY_TOKEN_TTL`])
//! 3. the signature matches, compared in constant time
//!
//! The token is claimed before the signature is checked, so a token is burnt
//! by its first use whether or not that request was authentic.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::kernel::BaseReplayLedger;

type HmacSha256 = Hmac<Sha256>;

/// Deliveries whose timestamp differs from now by this much or more are
/// rejected.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

/// How long a seen token is remembered.
pub const REPLAY_TOKEN_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("missing signature parameters")]
    MissingParameters,

    #[error("malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    #[error("stale timestamp: {skew_secs}s from server time")]
    StaleTimestamp { skew_secs: i64 },

    #[error("token already used")]
    ReplayedToken,

    #[error("invalid signature")]
    InvalidSignature,

    /// The replay ledger could not be consulted. Verification fails closed.
    #[error("replay ledger unavailable: {0:#}")]
    Ledger(anyhow::Error),
}

/// The three signed values of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParams<'a> {
    pub timestamp: &'a str,
    pub token: &'a str,
    pub signature: &'a str,
}

impl<'a> SignatureParams<'a> {
    /// Collect the values, rejecting any that are absent or blank.
    pub fn from_parts(
        timestamp: Option<&'a str>,
        token: Option<&'a str>,
        signature: Option<&'a str>,
    ) -> Result<Self, VerifyError> {
        let present = |value: Option<&'a str>| value.map(str::trim).filter(|v| !v.is_empty());

        match (present(timestamp), present(token), present(signature)) {
            (Some(timestamp), Some(token), Some(signature)) => Ok(Self {
                timestamp,
                token,
                signature,
            }),
            _ => Err(VerifyError::MissingParameters),
        }
    }
}

/// Computes the lowercase hex signature of a delivery.
///
/// This is useful for testing purposes (generating expected signatures).
pub fn compute_signature(timestamp: &str, token: &str, signing_key: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check only the HMAC. Uses constant-time comparison via the HMAC library.
pub fn signature_matches(params: &SignatureParams<'_>, signing_key: &[u8]) -> bool {
    let Ok(expected) = hex::decode(params.signature) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(signing_key) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(params.timestamp.as_bytes());
    mac.update(params.token.as_bytes());

    mac.verify_slice(&expected).is_ok()
}

/// Verify a delivery against the current time.
pub async fn verify(
    params: &SignatureParams<'_>,
    signing_key: &[u8],
    namespace: &str,
    ledger: &dyn BaseReplayLedger,
) -> Result<(), VerifyError> {
    verify_at(params, signing_key, namespace, ledger, Utc::now().timestamp()).await
}

/// Verify a delivery as of `now` (Unix seconds).
///
/// Tokens are recorded in the ledger as `<namespace>:<token>`, so providers
/// cannot burn each other's tokens.
pub async fn verify_at(
    params: &SignatureParams<'_>,
    signing_key: &[u8],
    namespace: &str,
    ledger: &dyn BaseReplayLedger,
    now: i64,
) -> Result<(), VerifyError> {
    let timestamp: i64 = params
        .timestamp
        .parse()
        .map_err(|_| VerifyError::MalformedTimestamp(params.timestamp.to_string()))?;

    let skew_secs = now.saturating_sub(timestamp).saturating_abs();
    if skew_secs >= MAX_TIMESTAMP_SKEW_SECS {
        return Err(VerifyError::StaleTimestamp { skew_secs });
    }

    let key = format!("{}:{}", namespace, params.token);
    let claimed = ledger
        .claim(&key, REPLAY_TOKEN_TTL)
        .await
        .map_err(VerifyError::Ledger)?;
    if !claimed {
        return Err(VerifyError::ReplayedToken);
    }

    if !signature_matches(params, signing_key) {
        return Err(VerifyError::InvalidSignature);
    }

    Ok(())
}
