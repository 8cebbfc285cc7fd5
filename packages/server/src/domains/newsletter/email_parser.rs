//! Email address utilities for newsletter ingestion.
//!
//! Handles the `"Name <address>"` sender format providers forward, and derives
//! the display values stored on new subscriptions.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NAMED_ADDRESS: Regex = Regex::new(r"^(.+?)\s*<(.+?)>$").unwrap();
    static ref NAME_SEPARATORS: Regex = Regex::new(r"[._-]").unwrap();
}

/// A sender or recipient split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub address: String,
    pub name: Option<String>,
}

/// Parse `"Name <email@domain.com>"` or plain `"email@domain.com"`.
pub fn parse_address(raw: &str) -> ParsedAddress {
    let raw = raw.trim();

    if let Some(captures) = NAMED_ADDRESS.captures(raw) {
        let name = captures[1].trim().trim_matches('"').trim();
        return ParsedAddress {
            address: captures[2].trim().to_string(),
            name: (!name.is_empty()).then(|| name.to_string()),
        };
    }

    ParsedAddress {
        address: raw.trim_start_matches('<').trim_end_matches('>').to_string(),
        name: None,
    }
}

/// Extract the bare address, unwrapping any display name.
pub fn extract_address(raw: &str) -> String {
    parse_address(raw).address
}

/// Extract the sender's domain from an email address.
/// e.g., "newsletter@example.org" → "example.org"
pub fn extract_sender_domain(from: &str) -> Option<String> {
    let address = extract_address(from);
    address
        .split_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|domain| !domain.is_empty())
}

/// Derive a readable newsletter name for a new subscription.
///
/// The sender's local part is split on `.`, `_` and `-` and each word is
/// capitalized ("weekly.digest@x.com" → "Weekly Digest"). Without a local
/// part the first 50 characters of the subject are used.
pub fn newsletter_name(sender: &str, subject: &str) -> String {
    let address = extract_address(sender);

    match address.split_once('@') {
        Some((local, _)) if !local.is_empty() => NAME_SEPARATORS
            .split(local)
            .map(capitalize_first)
            .collect::<Vec<_>>()
            .join(" "),
        _ => subject.chars().take(50).collect(),
    }
}

fn capitalize_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
