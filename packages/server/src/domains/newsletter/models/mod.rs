pub mod newsletter;

pub use newsletter::*;
