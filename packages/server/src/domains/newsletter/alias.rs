//! Per-user inbound addresses.
//!
//! Every user receives newsletters at `u-<user_id>@<alias domain>`. The
//! recipient of an inbound webhook is resolved back to the user through the
//! same format.

use lazy_static::lazy_static;
use regex::Regex;

use super::email_parser::extract_address;

lazy_static! {
    static ref ALIAS: Regex = Regex::new(r"(?i)^u-([a-f0-9-]+)@").unwrap();
}

/// Build the inbound address for a user.
pub fn email_alias(user_id: &str, domain: &str) -> String {
    format!("u-{}@{}", user_id, domain)
}

/// Resolve the user id from an inbound recipient.
///
/// Accepts bare addresses and `"Name <address>"`. Returns `None` when the
/// recipient is not an alias; the id is returned lowercased.
pub fn user_id_from_alias(recipient: &str) -> Option<String> {
    let address = extract_address(recipient);
    ALIAS
        .captures(&address)
        .map(|captures| captures[1].to_lowercase())
}

/// Whether a user id can be embedded in an alias and resolved back.
pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c) || c == '-')
}
