// Newsletter Ingestion Service - API Core
//
// Receives inbound email webhooks, verifies them, stores each delivery against
// the user's subscriptions and extracts a readable article in the background.
//
// Domains live in domains/*; shared infrastructure (stores, job queue, runner,
// scheduler) lives in kernel/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
