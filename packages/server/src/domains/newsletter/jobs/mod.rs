pub mod parse_email;
pub mod reconcile;

pub use parse_email::{parse_newsletter, ParseEmailJob};
pub use reconcile::{reconcile_pending, ReconcileReport};

use crate::kernel::jobs::JobRegistry;

/// Register the newsletter domain's job handlers.
pub fn register_jobs(registry: &mut JobRegistry) {
    registry.register::<ParseEmailJob, _, _>(ParseEmailJob::JOB_TYPE, parse_newsletter);
}
