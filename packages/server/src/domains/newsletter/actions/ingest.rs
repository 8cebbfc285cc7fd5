//! Newsletter ingestion.
//!
//! Turns one verified inbound email into a pending newsletter, its
//! subscription update, and a parse job. Safe to call repeatedly with the
//! same email: redeliveries resolve to `Duplicate` without side effects.

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::generate_message_fingerprint;
use crate::domains::newsletter::alias::user_id_from_alias;
use crate::domains::newsletter::email_parser::{
    extract_sender_domain, newsletter_name, parse_address,
};
use crate::domains::newsletter::jobs::ParseEmailJob;
use crate::domains::newsletter::models::{DeliveryRecord, NewDelivery};
use crate::domains::subscriptions::SubscriptionSeed;
use crate::kernel::jobs::enqueue_command;
use crate::kernel::ServerDeps;

pub const DEFAULT_SUBJECT: &str = "No Subject";

/// Provider-independent view of an inbound email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundEmail {
    pub recipient: Option<String>,
    pub sender: Option<String>,
    /// Display name when the provider reports it apart from `sender`
    pub from_name: Option<String>,
    pub subject: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
    pub message_id: Option<String>,
}

impl InboundEmail {
    /// HTML body when present, otherwise the plain-text body.
    pub fn content(&self) -> Option<&str> {
        non_blank(self.html.as_deref()).or_else(|| non_blank(self.text.as_deref()))
    }

    /// The provider's message id, or a fingerprint of the email so that
    /// redeliveries of an id-less email still deduplicate.
    pub fn message_id_or_fingerprint(&self) -> String {
        match non_blank(self.message_id.as_deref()) {
            Some(id) => id.trim().to_string(),
            None => generate_message_fingerprint(&[
                self.sender.as_deref().unwrap_or_default(),
                self.recipient.as_deref().unwrap_or_default(),
                self.subject.as_deref().unwrap_or_default(),
                self.html.as_deref().unwrap_or_default(),
                self.text.as_deref().unwrap_or_default(),
            ]),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("Email has no content")]
    EmptyContent,
}

/// What happened to an inbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored and queued for parsing. `job_id` is `None` when the enqueue
    /// failed; the reconciliation sweep enqueues it later.
    Accepted {
        newsletter_id: Uuid,
        job_id: Option<Uuid>,
    },
    Duplicate {
        message_id: String,
    },
    UnknownAlias {
        recipient: String,
    },
    UnknownUser {
        user_id: String,
    },
    Invalid(ValidationFailure),
}

/// Ingest one verified inbound email.
///
/// `Err` is reserved for persistence failures; every expected rejection is an
/// [`IngestOutcome`] variant.
pub async fn ingest(email: &InboundEmail, deps: &ServerDeps) -> Result<IngestOutcome> {
    let Some(recipient) = non_blank(email.recipient.as_deref()) else {
        return Ok(IngestOutcome::Invalid(ValidationFailure::MissingField(
            "recipient",
        )));
    };
    let Some(sender) = non_blank(email.sender.as_deref()) else {
        return Ok(IngestOutcome::Invalid(ValidationFailure::MissingField("sender")));
    };

    let message_id = email.message_id_or_fingerprint();
    info!(
        recipient = %recipient,
        sender = %sender,
        subject = ?email.subject,
        message_id = %message_id,
        "processing incoming email"
    );

    let Some(user_id) = user_id_from_alias(recipient) else {
        warn!(recipient = %recipient, "recipient is not a user alias");
        return Ok(IngestOutcome::UnknownAlias {
            recipient: recipient.to_string(),
        });
    };

    if deps.users.find_user(&user_id).await?.is_none() {
        warn!(user_id = %user_id, recipient = %recipient, "user not found for email alias");
        return Ok(IngestOutcome::UnknownUser { user_id });
    }

    if deps
        .newsletters
        .find_by_message_id(&message_id)
        .await?
        .is_some()
    {
        info!(message_id = %message_id, "duplicate email detected, skipping");
        return Ok(IngestOutcome::Duplicate { message_id });
    }

    let Some(content) = email.content() else {
        return Ok(IngestOutcome::Invalid(ValidationFailure::EmptyContent));
    };

    let from = parse_address(sender);
    let subject = non_blank(email.subject.as_deref())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

    let delivery = NewDelivery {
        user_id: user_id.clone(),
        message_id: message_id.clone(),
        from_email: from.address.clone(),
        from_name: non_blank(email.from_name.as_deref())
            .map(|name| name.trim().to_string())
            .or(from.name),
        subject: subject.clone(),
        html_content: content.to_string(),
        text_content: non_blank(email.text.as_deref()).map(str::to_string),
        received_at: Utc::now(),
        subscription: SubscriptionSeed {
            user_id: user_id.clone(),
            sender_email: from.address.to_lowercase(),
            sender_domain: extract_sender_domain(&from.address),
            newsletter_name: newsletter_name(&from.address, &subject),
        },
    };

    let newsletter = match deps.newsletters.record_delivery(&delivery).await? {
        DeliveryRecord::Created {
            newsletter,
            subscription,
        } => {
            info!(
                newsletter_id = %newsletter.id,
                subscription_id = %subscription.id,
                email_count = subscription.email_count,
                "newsletter stored"
            );
            newsletter
        }
        DeliveryRecord::Duplicate => {
            info!(message_id = %message_id, "concurrent duplicate email, skipping");
            return Ok(IngestOutcome::Duplicate { message_id });
        }
    };

    let job = ParseEmailJob {
        newsletter_id: newsletter.id,
        html: newsletter.html_content.clone(),
        from_email: newsletter.from_email.clone(),
        subject: newsletter.subject.clone(),
    };

    let job_id = match enqueue_command(deps.job_queue.as_ref(), &job).await {
        Ok(result) => Some(result.job_id()),
        Err(e) => {
            error!(
                newsletter_id = %newsletter.id,
                error = %e,
                "failed to enqueue parse job; left pending for reconciliation"
            );
            None
        }
    };

    info!(newsletter_id = %newsletter.id, user_id = %user_id, "email queued for parsing");

    Ok(IngestOutcome::Accepted {
        newsletter_id: newsletter.id,
        job_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::newsletter::models::ParseStatus;
    use crate::kernel::test_dependencies::TestDependencies;

    #[test]
    fn test_content_prefers_html() {
        let email = InboundEmail {
            html: Some("<p>hi</p>".to_string()),
            text: Some("hi".to_string()),
            ..Default::default()
        };
        assert_eq!(email.content(), Some("<p>hi</p>"));

        let email = InboundEmail {
            html: Some("   ".to_string()),
            text: Some("hi".to_string()),
            ..Default::default()
        };
        assert_eq!(email.content(), Some("hi"));

        assert_eq!(InboundEmail::default().content(), None);
    }

    #[test]
    fn test_message_id_fingerprint_is_stable() {
        let email = InboundEmail {
            sender: Some("news@example.com".to_string()),
            recipient: Some("u-abc@x.test".to_string()),
            html: Some("<p>x</p>".to_string()),
            ..Default::default()
        };
        let first = email.message_id_or_fingerprint();
        assert!(first.starts_with("generated-"));
        assert_eq!(first, email.clone().message_id_or_fingerprint());

        let with_id = InboundEmail {
            message_id: Some(" <abc@mail> ".to_string()),
            ..email
        };
        assert_eq!(with_id.message_id_or_fingerprint(), "<abc@mail>");
    }

    const USER: &str = "abc-123";

    fn email(sender: &str, message_id: &str) -> InboundEmail {
        InboundEmail {
            recipient: Some(format!("Inbox <u-{}@newsletters.test>", USER)),
            sender: Some(sender.to_string()),
            subject: Some("Issue".to_string()),
            html: Some("<p>Hello there, readers.</p>".to_string()),
            message_id: Some(message_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_accepted_email_is_stored_and_queued() {
        let test_deps = TestDependencies::new().with_user(USER);
        let deps = test_deps.into_deps();

        let outcome = ingest(&email("Jane <jane.doe@writes.example.com>", "<m1@x>"), &deps)
            .await
            .unwrap();

        let IngestOutcome::Accepted {
            newsletter_id,
            job_id,
        } = outcome
        else {
            panic!("expected Accepted, got {:?}", outcome);
        };
        assert!(job_id.is_some());

        let newsletter = test_deps.store.newsletters().remove(0);
        assert_eq!(newsletter.id, newsletter_id);
        assert_eq!(newsletter.from_email, "jane.doe@writes.example.com");
        assert_eq!(newsletter.from_name.as_deref(), Some("Jane"));
        assert_eq!(newsletter.parse_status, ParseStatus::Pending);
        assert_eq!(newsletter.clean_content, "");

        let subscription = test_deps.store.subscriptions().remove(0);
        assert_eq!(subscription.newsletter_name, "Jane Doe");
        assert_eq!(subscription.sender_domain.as_deref(), Some("writes.example.com"));
        assert_eq!(subscription.email_count, 1);
    }

    #[tokio::test]
    async fn test_subscription_counts_each_message() {
        let test_deps = TestDependencies::new().with_user(USER);
        let deps = test_deps.into_deps();

        for id in ["<a@x>", "<b@x>", "<c@x>"] {
            ingest(&email("news@daily.example", id), &deps).await.unwrap();
        }
        ingest(&email("other@weekly.example", "<d@x>"), &deps)
            .await
            .unwrap();

        let mut subscriptions = test_deps.store.subscriptions();
        subscriptions.sort_by(|a, b| a.sender_email.cmp(&b.sender_email));
        assert_eq!(subscriptions.len(), 2);
        assert_eq!(subscriptions[0].sender_email, "news@daily.example");
        assert_eq!(subscriptions[0].email_count, 3);
        assert_eq!(subscriptions[1].sender_email, "other@weekly.example");
        assert_eq!(subscriptions[1].email_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_has_no_side_effects() {
        let test_deps = TestDependencies::new().with_user(USER);
        let deps = test_deps.into_deps();

        ingest(&email("news@daily.example", "<same@x>"), &deps)
            .await
            .unwrap();
        let outcome = ingest(&email("news@daily.example", "<same@x>"), &deps)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::Duplicate {
                message_id: "<same@x>".to_string()
            }
        );
        assert_eq!(test_deps.store.newsletters().len(), 1);
        assert_eq!(test_deps.store.subscriptions()[0].email_count, 1);
        assert_eq!(test_deps.job_queue.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejections() {
        let test_deps = TestDependencies::new().with_user(USER);
        let deps = test_deps.into_deps();

        let mut no_recipient = email("news@daily.example", "<1@x>");
        no_recipient.recipient = None;
        assert_eq!(
            ingest(&no_recipient, &deps).await.unwrap(),
            IngestOutcome::Invalid(ValidationFailure::MissingField("recipient"))
        );

        let mut not_alias = email("news@daily.example", "<2@x>");
        not_alias.recipient = Some("hello@newsletters.test".to_string());
        assert!(matches!(
            ingest(&not_alias, &deps).await.unwrap(),
            IngestOutcome::UnknownAlias { .. }
        ));

        let mut unknown = email("news@daily.example", "<3@x>");
        unknown.recipient = Some("u-ffff@newsletters.test".to_string());
        assert_eq!(
            ingest(&unknown, &deps).await.unwrap(),
            IngestOutcome::UnknownUser {
                user_id: "ffff".to_string()
            }
        );

        let mut empty = email("news@daily.example", "<4@x>");
        empty.html = Some(" ".to_string());
        assert_eq!(
            ingest(&empty, &deps).await.unwrap(),
            IngestOutcome::Invalid(ValidationFailure::EmptyContent)
        );

        assert!(test_deps.store.newsletters().is_empty());
    }

    #[tokio::test]
    async fn test_plain_text_only_email_is_accepted() {
        let test_deps = TestDependencies::new().with_user(USER);
        let deps = test_deps.into_deps();

        let mut plain = email("news@daily.example", "<plain@x>");
        plain.html = None;
        plain.text = Some("Just text".to_string());
        plain.subject = None;

        ingest(&plain, &deps).await.unwrap();

        let newsletter = test_deps.store.newsletters().remove(0);
        assert_eq!(newsletter.html_content, "Just text");
        assert_eq!(newsletter.text_content.as_deref(), Some("Just text"));
        assert_eq!(newsletter.subject, DEFAULT_SUBJECT);
    }
}
