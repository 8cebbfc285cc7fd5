// Users domain - registration of readers and their inbound aliases

pub mod actions;
pub mod models;

pub use actions::*;
pub use models::*;
