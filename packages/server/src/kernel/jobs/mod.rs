//! Job infrastructure for background command execution.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`PostgresJobQueue`] - Database-backed job queue
//! - [`MemoryJobQueue`] - In-process queue used by tests
//! - [`JobRunner`] - Long-running service that claims and executes jobs
//! - [`JobRegistry`] - Maps job types to handlers
//!
//! # Architecture
//!
//! ```text
//! Ingestion calls enqueue_command(queue, &ParseEmailJob { .. })
//!     │
//!     └─► JobQueue.enqueue()
//!             └─► Insert row (deduplicated on idempotency key)
//!
//! JobRunner
//!     │
//!     ├─► Claim jobs (lease + attempt counter)
//!     ├─► Deserialize payload (JobRegistry)
//!     ├─► Run handler with heartbeat and timeout
//!     └─► Mark succeeded/failed (retry, fail or dead letter)
//! ```
//!
//! Job handlers live in their domains. This module only provides the
//! infrastructure.

mod error;
mod job;
mod memory;
mod queue;
mod registry;
mod runner;

pub use error::{classify_error, JobFailure};
pub use job::{ErrorKind, FailureTransition, Job, JobStatus, RetryPolicy};
pub use memory::MemoryJobQueue;
pub use queue::{
    enqueue_command, job_spec, ClaimedJob, CommandMeta, EnqueueResult, JobQueue, JobSpec,
    PostgresJobQueue,
};
pub use registry::{JobRegistry, SharedJobRegistry};
pub use runner::{JobRunner, JobRunnerConfig};
