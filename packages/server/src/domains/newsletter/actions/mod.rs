pub mod ingest;

pub use ingest::{ingest, InboundEmail, IngestOutcome, ValidationFailure};
