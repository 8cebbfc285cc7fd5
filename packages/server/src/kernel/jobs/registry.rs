//! Job registry for deserializing and executing jobs.
//!
//! The registry maps job type strings (e.g., "parse_email") to handlers that
//! reconstruct the typed job from JSON and run it. This lets the
//! [`JobRunner`](super::JobRunner) dispatch claimed jobs without knowing the
//! concrete types.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;

use super::error::JobFailure;
use super::queue::{ClaimedJob, CommandMeta};
use crate::kernel::ServerDeps;

/// Type alias for the async handler function.
type BoxedHandler = Box<
    dyn Fn(serde_json::Value, Arc<ServerDeps>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Registry that maps job type strings to handlers.
///
/// # Example
///
/// ```ignore
/// let mut registry = JobRegistry::new();
/// registry.register::<ParseEmailJob, _, _>(ParseEmailJob::JOB_TYPE, |job, deps| async move {
///     parse_newsletter(job, &deps).await
/// });
/// ```
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<&'static str, BoxedHandler>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a job type with its handler.
    ///
    /// The payload is deserialized into `J` before the handler runs; a payload
    /// that does not deserialize fails the job as non-retryable.
    pub fn register<J, F, Fut>(&mut self, job_type: &'static str, handler: F)
    where
        J: CommandMeta + DeserializeOwned + Send + Sync + 'static,
        F: Fn(J, Arc<ServerDeps>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed_handler: BoxedHandler = Box::new(move |value, deps| {
            let handler = handler.clone();
            Box::pin(async move {
                let job: J = serde_json::from_value(value).map_err(|source| {
                    JobFailure::InvalidPayload {
                        job_type: job_type.to_string(),
                        source,
                    }
                })?;
                handler(job, deps).await
            })
        });

        self.handlers.insert(job_type, boxed_handler);
    }

    /// Execute a claimed job using its registered handler.
    pub async fn execute(&self, job: &ClaimedJob, deps: Arc<ServerDeps>) -> Result<()> {
        let job_type = job.command_type();
        let handler = self
            .handlers
            .get(job_type)
            .ok_or_else(|| JobFailure::UnknownType(job_type.to_string()))?;

        handler(job.job.args.clone(), deps).await
    }

    /// Check if a job type is registered.
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Get all registered job types.
    pub fn registered_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;
