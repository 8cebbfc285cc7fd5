//! Failure classification for job handlers.
//!
//! Handlers return `anyhow::Error`. Anything in the error chain that is a
//! [`JobFailure`] decides the retry behaviour; everything else is treated as
//! transient.

use std::time::Duration;

use thiserror::Error;

use super::job::ErrorKind;

#[derive(Debug, Error)]
pub enum JobFailure {
    /// Retrying with the same payload cannot succeed
    #[error("{0}")]
    Permanent(String),

    #[error("job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("unknown job type: {0}")]
    UnknownType(String),

    #[error("invalid payload for {job_type}: {source}")]
    InvalidPayload {
        job_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl JobFailure {
    pub fn permanent(message: impl Into<String>) -> Self {
        JobFailure::Permanent(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JobFailure::TimedOut(_) => ErrorKind::Retryable,
            JobFailure::Permanent(_)
            | JobFailure::UnknownType(_)
            | JobFailure::InvalidPayload { .. } => ErrorKind::NonRetryable,
        }
    }
}

/// Classify an error to determine retry behavior.
pub fn classify_error(error: &anyhow::Error) -> ErrorKind {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<JobFailure>())
        .map(JobFailure::kind)
        .unwrap_or(ErrorKind::Retryable)
}
