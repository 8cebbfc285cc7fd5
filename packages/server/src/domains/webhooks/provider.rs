//! Inbound email providers and their verification policies.

use std::fmt;

use crate::domains::newsletter::email_parser::parse_address;
use crate::domains::newsletter::InboundEmail;

use super::fields::WebhookFields;
use super::signature::{SignatureParams, VerifyError};

/// A provider that posts inbound email to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundProvider {
    Mailgun,
    SendGrid,
}

impl InboundProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mailgun => "mailgun",
            Self::SendGrid => "sendgrid",
        }
    }

    /// Read the signature values from `x-<provider>-*` headers, falling back
    /// to body fields.
    pub fn signature_params<'a>(
        &self,
        fields: &'a WebhookFields,
    ) -> Result<SignatureParams<'a>, VerifyError> {
        let value = |name: &str| {
            fields
                .header(&format!("x-{}-{}", self.as_str(), name))
                .or_else(|| fields.field(&[name]))
        };

        SignatureParams::from_parts(value("timestamp"), value("token"), value("signature"))
    }

    /// Decode the provider's field names into an [`InboundEmail`].
    pub fn decode(&self, fields: &WebhookFields) -> InboundEmail {
        let owned = |value: Option<&str>| value.map(str::to_string);

        match self {
            Self::Mailgun => InboundEmail {
                recipient: owned(fields.field(&["recipient", "to"])),
                sender: owned(fields.field(&["sender", "from"])),
                from_name: fields.field(&["from"]).and_then(|from| parse_address(from).name),
                subject: owned(fields.field(&["subject"])),
                html: owned(fields.field(&["body-html", "html"])),
                text: owned(fields.field(&["body-plain", "text"])),
                message_id: owned(
                    fields
                        .field(&["Message-Id", "message-id"])
                        .or_else(|| fields.email_header("message-id")),
                ),
            },
            Self::SendGrid => InboundEmail {
                recipient: owned(fields.field(&["to", "recipient"])),
                sender: owned(fields.field(&["from", "sender"])),
                from_name: fields.field(&["from"]).and_then(|from| parse_address(from).name),
                subject: owned(fields.field(&["subject"])),
                html: owned(fields.field(&["html", "body-html"])),
                text: owned(fields.field(&["text", "body-plain"])),
                message_id: owned(
                    fields
                        .email_header("message-id")
                        .or_else(|| fields.field(&["message-id", "Message-Id"])),
                ),
            },
        }
    }
}

impl fmt::Display for InboundProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How deliveries from one provider are authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum VerificationPolicy {
    /// Require a valid HMAC signature and unused token
    Hmac { signing_key: String },
    /// Accept unsigned deliveries. Must be opted into explicitly.
    TrustedUnsigned,
    /// The endpoint answers "provider not configured"
    Disabled,
}

impl VerificationPolicy {
    pub fn hmac(signing_key: impl Into<String>) -> Self {
        Self::Hmac {
            signing_key: signing_key.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl fmt::Debug for VerificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hmac { .. } => f.write_str("Hmac { signing_key: <redacted> }"),
            Self::TrustedUnsigned => f.write_str("TrustedUnsigned"),
            Self::Disabled => f.write_str("Disabled"),
        }
    }
}

/// Verification policy for each provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookPolicies {
    pub mailgun: VerificationPolicy,
    pub sendgrid: VerificationPolicy,
}

impl WebhookPolicies {
    pub fn for_provider(&self, provider: InboundProvider) -> &VerificationPolicy {
        match provider {
            InboundProvider::Mailgun => &self.mailgun,
            InboundProvider::SendGrid => &self.sendgrid,
        }
    }
}

impl Default for WebhookPolicies {
    fn default() -> Self {
        Self {
            mailgun: VerificationPolicy::Disabled,
            sendgrid: VerificationPolicy::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailgun_field_priority() {
        let fields = WebhookFields::new()
            .with_field("recipient", "u-abc@x.test")
            .with_field("to", "Someone <other@x.test>")
            .with_field("sender", "news@example.com")
            .with_field("from", "News <news@example.com>")
            .with_field("body-html", "<p>html</p>")
            .with_field("body-plain", "plain")
            .with_field("Message-Id", "<m1@mail>");

        let email = InboundProvider::Mailgun.decode(&fields);
        assert_eq!(email.recipient.as_deref(), Some("u-abc@x.test"));
        assert_eq!(email.sender.as_deref(), Some("news@example.com"));
        assert_eq!(email.from_name.as_deref(), Some("News"));
        assert_eq!(email.html.as_deref(), Some("<p>html</p>"));
        assert_eq!(email.text.as_deref(), Some("plain"));
        assert_eq!(email.message_id.as_deref(), Some("<m1@mail>"));
    }

    #[test]
    fn test_sendgrid_reads_raw_headers() {
        let fields = WebhookFields::new()
            .with_field("to", "u-abc@x.test")
            .with_field("from", "News <news@example.com>")
            .with_field("html", "<p>hi</p>")
            .with_field("headers", "Message-ID: <sg@mail>\nSubject: Hi\n");

        let email = InboundProvider::SendGrid.decode(&fields);
        assert_eq!(email.recipient.as_deref(), Some("u-abc@x.test"));
        assert_eq!(email.sender.as_deref(), Some("News <news@example.com>"));
        assert_eq!(email.message_id.as_deref(), Some("<sg@mail>"));
        assert_eq!(email.text, None);
    }

    #[test]
    fn test_signature_params_prefer_headers() {
        let fields = WebhookFields::new()
            .with_header("X-Mailgun-Timestamp", "1700000000")
            .with_header("X-Mailgun-Token", "header-token")
            .with_field("token", "body-token")
            .with_field("signature", "abcd");

        let params = InboundProvider::Mailgun.signature_params(&fields).unwrap();
        assert_eq!(params.timestamp, "1700000000");
        assert_eq!(params.token, "header-token");
        assert_eq!(params.signature, "abcd");
    }

    #[test]
    fn test_missing_signature_params() {
        let fields = WebhookFields::new().with_field("token", "t");
        assert!(matches!(
            InboundProvider::SendGrid.signature_params(&fields),
            Err(VerifyError::MissingParameters)
        ));
    }

    #[test]
    fn test_policy_debug_redacts_key() {
        let policy = VerificationPolicy::hmac("super-secret");
        assert!(!format!("{:?}", policy).contains("super-secret"));
    }
}
