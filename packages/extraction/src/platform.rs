//! Newsletter platform fingerprinting.

use serde::{Deserialize, Serialize};

/// Hosted newsletter platform an email was sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Substack,
    Beehiiv,
    Ghost,
    ConvertKit,
    Mailchimp,
    Buttondown,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Substack => "substack",
            Platform::Beehiiv => "beehiiv",
            Platform::Ghost => "ghost",
            Platform::ConvertKit => "convertkit",
            Platform::Mailchimp => "mailchimp",
            Platform::Buttondown => "buttondown",
            Platform::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guess the sending platform from the sender address and markup.
pub fn detect_platform(html: &str, from_email: &str) -> Platform {
    let from = from_email.to_ascii_lowercase();
    let html = html.to_ascii_lowercase();

    if from.contains("substack.com") {
        Platform::Substack
    } else if html.contains("beehiiv") {
        Platform::Beehiiv
    } else if html.contains("ghost.io") || html.contains("ghost.org") {
        Platform::Ghost
    } else if html.contains("convertkit") {
        Platform::ConvertKit
    } else if html.contains("mailchimp") || html.contains("list-manage.com") {
        Platform::Mailchimp
    } else if from.contains("buttondown.email") {
        Platform::Buttondown
    } else {
        Platform::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platform() {
        assert_eq!(detect_platform("", "writer@substack.com"), Platform::Substack);
        assert_eq!(
            detect_platform(r#"<img src="https://media.beehiiv.com/x.png">"#, "a@b.com"),
            Platform::Beehiiv
        );
        assert_eq!(
            detect_platform(r#"<a href="https://us1.list-manage.com/unsubscribe">"#, "a@b.com"),
            Platform::Mailchimp
        );
        assert_eq!(detect_platform("<p>hi</p>", "me@buttondown.email"), Platform::Buttondown);
        assert_eq!(detect_platform("<p>hi</p>", "me@example.com"), Platform::Unknown);
    }
}
