// Business domains
pub mod newsletter;
pub mod subscriptions;
pub mod users;
pub mod webhooks;
