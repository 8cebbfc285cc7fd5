pub mod webhook_token;

pub use webhook_token::*;
