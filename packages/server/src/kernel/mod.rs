//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod jobs;
pub mod postgres_store;
pub mod scheduled_tasks;
pub mod test_dependencies;
pub mod traits;

pub use deps::{ServerDeps, DEFAULT_EXTRACTION_TIMEOUT};
pub use postgres_store::PostgresStore;
pub use scheduled_tasks::start_scheduler;
pub use test_dependencies::{MemoryStore, TestDependencies};
pub use traits::*;
