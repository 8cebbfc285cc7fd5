//! Test fixtures: signed webhook bodies and sample newsletters.

use chrono::Utc;
use serde_json::{json, Value};
use server_core::domains::webhooks::signature::compute_signature;
use uuid::Uuid;

pub const MAILGUN_KEY: &str = "mailgun-test-signing-key";
pub const SENDGRID_KEY: &str = "sendgrid-test-signing-key";

pub const TEST_USER_ID: &str = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";

/// `u-<TEST_USER_ID>@newsletters.test`
pub fn test_alias() -> String {
    format!("u-{}@newsletters.test", TEST_USER_ID)
}

pub const ARTICLE_HTML: &str = r#"<html>
<head>
  <title>Weekly Digest #42</title>
  <meta name="author" content="Jane Writer">
</head>
<body>
  <div class="header"><a href="https://example.com">Home</a></div>
  <div class="post-content">
    <h1>Weekly Digest #42</h1>
    <p>Welcome back to the weekly digest, where we round up the most interesting
    stories, essays, and links from the past seven days, with commentary.</p>
    <p>This week we look at storage engines, the economics of open source, and a
    long essay on why simple tools tend to outlive their clever replacements.</p>
    <script>alert('xss')</script>
    <img src="https://example.com/chart.png" onerror="steal()" alt="chart">
    <iframe src="https://evil.example/frame"></iframe>
  </div>
  <div class="footer">Unsubscribe | Manage preferences</div>
  <img src="https://track.example.com/open.gif" width="1" height="1">
</body>
</html>"#;

/// A fresh timestamp, token and matching signature.
pub struct Signed {
    pub timestamp: String,
    pub token: String,
    pub signature: String,
}

pub fn sign(key: &str) -> Signed {
    sign_at(key, Utc::now().timestamp())
}

pub fn sign_at(key: &str, timestamp: i64) -> Signed {
    let timestamp = timestamp.to_string();
    let token = Uuid::new_v4().simple().to_string();
    let signature = compute_signature(&timestamp, &token, key.as_bytes());
    Signed {
        timestamp,
        token,
        signature,
    }
}

/// Mailgun form fields for one email.
pub fn mailgun_fields(signed: &Signed, message_id: &str, html: &str) -> Vec<(String, String)> {
    let alias = test_alias();
    [
        ("timestamp", signed.timestamp.as_str()),
        ("token", signed.token.as_str()),
        ("signature", signed.signature.as_str()),
        ("recipient", alias.as_str()),
        ("sender", "editor@substack.com"),
        ("from", "Jane Writer <editor@substack.com>"),
        ("subject", "Weekly Digest #42"),
        ("body-html", html),
        ("Message-Id", message_id),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

/// SendGrid-style JSON body for one email.
pub fn sendgrid_json(signed: &Signed, message_id: &str, html: &str) -> Value {
    json!({
        "timestamp": signed.timestamp,
        "token": signed.token,
        "signature": signed.signature,
        "to": format!("Reader <{}>", test_alias()),
        "from": "Morning Brew <crew@morningbrew.com>",
        "subject": "Your morning briefing",
        "html": html,
        "headers": format!("Message-ID: {}\r\nSubject: Your morning briefing\r\n", message_id),
    })
}

/// Replace (or add) one field.
pub fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    fields.retain(|(n, _)| n != name);
    fields.push((name.to_string(), value.to_string()));
}

/// Drop a field.
pub fn remove_field(fields: &mut Vec<(String, String)>, name: &str) {
    fields.retain(|(n, _)| n != name);
}
