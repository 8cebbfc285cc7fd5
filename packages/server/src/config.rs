use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::webhooks::{VerificationPolicy, WebhookPolicies};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    pub email_alias_domain: String,
    pub mailgun_webhook_signing_key: Option<String>,
    pub sendgrid_webhook_signing_key: Option<String>,
    pub sendgrid_trust_unsigned: bool,
    pub worker_concurrency: usize,
    pub worker_max_starts_per_second: u32,
    pub job_max_attempts: i32,
    pub job_backoff_base: Duration,
    pub extraction_timeout: Duration,
    pub shutdown_grace: Duration,
    pub reconcile_after: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            port: parse_or("PORT", 8080)?,
            email_alias_domain: env::var("EMAIL_ALIAS_DOMAIN")
                .unwrap_or_else(|_| "newsletters.localhost".to_string()),
            mailgun_webhook_signing_key: optional("MAILGUN_WEBHOOK_SIGNING_KEY"),
            sendgrid_webhook_signing_key: optional("SENDGRID_WEBHOOK_SIGNING_KEY"),
            sendgrid_trust_unsigned: parse_or("SENDGRID_TRUST_UNSIGNED", false)?,
            worker_concurrency: parse_or("WORKER_CONCURRENCY", 5)?,
            worker_max_starts_per_second: parse_or("WORKER_MAX_STARTS_PER_SECOND", 10)?,
            job_max_attempts: parse_or("JOB_MAX_ATTEMPTS", 3)?,
            job_backoff_base: Duration::from_millis(parse_or("JOB_BACKOFF_BASE_MS", 2_000)?),
            extraction_timeout: Duration::from_secs(parse_or("EXTRACTION_TIMEOUT_SECS", 30)?),
            shutdown_grace: Duration::from_secs(parse_or("SHUTDOWN_GRACE_SECS", 30)?),
            reconcile_after: Duration::from_secs(parse_or("RECONCILE_AFTER_SECS", 600)?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }
        if self.job_max_attempts < 1 {
            bail!("JOB_MAX_ATTEMPTS must be at least 1");
        }
        if self.sendgrid_trust_unsigned && self.sendgrid_webhook_signing_key.is_some() {
            bail!("SENDGRID_TRUST_UNSIGNED cannot be combined with SENDGRID_WEBHOOK_SIGNING_KEY");
        }
        Ok(())
    }

    /// Verification policy per provider.
    ///
    /// A provider without a signing key is disabled. SendGrid may instead be
    /// explicitly trusted unsigned.
    pub fn webhook_policies(&self) -> WebhookPolicies {
        let mailgun = match &self.mailgun_webhook_signing_key {
            Some(key) => VerificationPolicy::hmac(key.clone()),
            None => VerificationPolicy::Disabled,
        };

        let sendgrid = match (&self.sendgrid_webhook_signing_key, self.sendgrid_trust_unsigned) {
            (Some(key), _) => VerificationPolicy::hmac(key.clone()),
            (None, true) => VerificationPolicy::TrustedUnsigned,
            (None, false) => VerificationPolicy::Disabled,
        };

        WebhookPolicies { mailgun, sendgrid }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid {}", name, std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: "postgres://localhost/newsletters".to_string(),
            database_max_connections: 10,
            port: 8080,
            email_alias_domain: "newsletters.test".to_string(),
            mailgun_webhook_signing_key: None,
            sendgrid_webhook_signing_key: None,
            sendgrid_trust_unsigned: false,
            worker_concurrency: 5,
            worker_max_starts_per_second: 10,
            job_max_attempts: 3,
            job_backoff_base: Duration::from_millis(2_000),
            extraction_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
            reconcile_after: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_unconfigured_providers_are_disabled() {
        let policies = config().webhook_policies();
        assert_eq!(policies.mailgun, VerificationPolicy::Disabled);
        assert_eq!(policies.sendgrid, VerificationPolicy::Disabled);
    }

    #[test]
    fn test_signing_keys_enable_hmac() {
        let mut config = config();
        config.mailgun_webhook_signing_key = Some("mg-key".to_string());
        config.sendgrid_webhook_signing_key = Some("sg-key".to_string());

        let policies = config.webhook_policies();
        assert_eq!(policies.mailgun, VerificationPolicy::hmac("mg-key"));
        assert_eq!(policies.sendgrid, VerificationPolicy::hmac("sg-key"));
    }

    #[test]
    fn test_sendgrid_trust_unsigned_is_opt_in() {
        let mut config = config();
        config.sendgrid_trust_unsigned = true;
        assert_eq!(
            config.webhook_policies().sendgrid,
            VerificationPolicy::TrustedUnsigned
        );
    }

    #[test]
    fn test_trust_unsigned_conflicts_with_key() {
        let mut config = config();
        config.sendgrid_trust_unsigned = true;
        config.sendgrid_webhook_signing_key = Some("sg-key".to_string());
        assert!(config.validate().is_err());
    }
}
