//! Job model for background command execution.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    /// Terminal failure that was never eligible for retry
    Failed,
    /// Retryable failure that ran out of attempts
    DeadLetter,
    Cancelled,
}

impl JobStatus {
    /// Pending and running jobs hold their idempotency key.
    pub fn is_live(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "error_kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Job was cancelled by user/system
    Cancelled,
    /// Job was interrupted by graceful shutdown - will retry
    Shutdown,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Exponential backoff between attempts: `base * 2^(attempt - 1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_secs(3_600),
        }
    }
}

impl RetryPolicy {
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Default::default()
        }
    }

    /// Delay before the attempt that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 30) as u32;
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// What a failed attempt does to the job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Back to pending, runnable again at `next_run_at`
    Retry { next_run_at: DateTime<Utc> },
    /// Not retryable; terminal as `failed`
    Fail,
    /// Retryable but out of attempts; terminal as `dead_letter`
    DeadLetter,
}

impl FailureTransition {
    pub fn status(&self) -> JobStatus {
        match self {
            FailureTransition::Retry { .. } => JobStatus::Pending,
            FailureTransition::Fail => JobStatus::Failed,
            FailureTransition::DeadLetter => JobStatus::DeadLetter,
        }
    }
}

/// Per-attempt time limit when the command does not set one: 5 minutes.
pub const DEFAULT_TIMEOUT_MS: i64 = 300_000;

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    // Core identity
    pub job_type: String,
    #[builder(default)]
    pub reference_id: Option<Uuid>,

    // Payload
    pub args: serde_json::Value,

    // Scheduling
    #[builder(default = Utc::now())]
    pub next_run_at: DateTime<Utc>,

    // Execution settings
    /// Attempts started so far; incremented on every claim
    #[builder(default = 0)]
    pub attempt: i32,
    #[builder(default = 3)]
    pub max_attempts: i32,
    #[builder(default = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: i64,
    #[builder(default = 60_000)] // 1 minute
    pub lease_duration_ms: i64,

    // Lease management
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    // State
    #[builder(default)]
    pub status: JobStatus,

    // Error tracking
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_kind: Option<ErrorKind>,
    #[builder(default, setter(strip_option))]
    pub dead_lettered_at: Option<DateTime<Utc>>,

    // Command-level idempotency
    #[builder(default)]
    pub idempotency_key: Option<String>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a pending job from an enqueue request.
    pub fn from_spec(spec: &super::JobSpec, default_max_attempts: i32, lease_ms: i64) -> Self {
        Job::builder()
            .job_type(spec.job_type.clone())
            .reference_id(spec.reference_id)
            .args(spec.args.clone())
            .next_run_at(spec.run_at.unwrap_or_else(Utc::now))
            .max_attempts(spec.max_attempts.unwrap_or(default_max_attempts).max(1))
            .timeout_ms(spec.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
            .lease_duration_ms(lease_ms)
            .idempotency_key(spec.idempotency_key.clone())
            .build()
    }

    /// Whether a worker may claim this job at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => self.next_run_at <= now && self.attempt < self.max_attempts,
            JobStatus::Running => {
                self.lease_expires_at.is_some_and(|lease| lease < now)
                    && self.attempt < self.max_attempts
            }
            _ => false,
        }
    }

    pub fn attempts_remaining(&self) -> i32 {
        (self.max_attempts - self.attempt).max(0)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(0) as u64)
    }

    /// Decide the next state after the current attempt failed with `kind`.
    pub fn failure_transition(
        &self,
        kind: ErrorKind,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailureTransition {
        if !kind.should_retry() {
            return FailureTransition::Fail;
        }
        if self.attempt >= self.max_attempts {
            return FailureTransition::DeadLetter;
        }

        let delay = chrono::Duration::from_std(policy.delay_for(self.attempt))
            .unwrap_or_else(|_| chrono::Duration::seconds(3_600));
        FailureTransition::Retry {
            next_run_at: now + delay,
        }
    }
}
