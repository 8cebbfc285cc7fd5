// Subscriptions domain - one aggregate per (user, sender)
//
// Rows are written by newsletter ingestion; nothing else mutates them.

pub mod models;

pub use models::*;
