// Newsletter domain - inbound email ingestion and article extraction
//
// Responsibilities:
// - Resolving per-user inbound aliases
// - Recording deliveries (newsletter + subscription) idempotently
// - Background parsing of stored HTML into a reader view
// - Reconciling newsletters whose parse job was lost

pub mod actions;
pub mod alias;
pub mod email_parser;
pub mod jobs;
pub mod models;

pub use actions::*;
pub use models::*;
