//! Document metadata and derived article fields.

use std::collections::HashMap;

use scraper::{Html, Selector};

use crate::sanitize::collapse_whitespace;

/// Average adult reading speed used for read-time estimates.
pub const WORDS_PER_MINUTE: usize = 200;

/// Excerpts longer than this many characters are truncated.
pub const EXCERPT_CHARS: usize = 200;

/// `<meta>` values keyed by lowercased `property` or `name`. First occurrence wins.
#[derive(Debug, Default, Clone)]
pub struct MetaTags {
    values: HashMap<String, String>,
}

impl MetaTags {
    pub fn from_document(doc: &Html) -> Self {
        let mut values = HashMap::new();
        let Ok(selector) = Selector::parse("meta") else {
            return Self { values };
        };

        for meta in doc.select(&selector) {
            let value = meta.value();
            let key = value.attr("property").or_else(|| value.attr("name"));
            let content = value.attr("content").map(str::trim);
            if let (Some(key), Some(content)) = (key, content) {
                if !content.is_empty() {
                    values
                        .entry(key.trim().to_ascii_lowercase())
                        .or_insert_with(|| content.to_string());
                }
            }
        }

        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// First present value among `keys`, in order.
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }
}

/// Title from `og:title`, then `<title>`, then the first `<h1>`.
pub fn extract_title(doc: &Html, meta: &MetaTags) -> Option<String> {
    if let Some(title) = meta.get("og:title") {
        return Some(collapse_whitespace(title));
    }

    for css in ["title", "h1"] {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        if let Some(el) = doc.select(&selector).next() {
            let text = collapse_whitespace(&el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    None
}

/// Author from a detected byline, else `article:author`, `author`, `og:author`.
pub fn extract_author(byline: Option<String>, meta: &MetaTags) -> Option<String> {
    byline
        .filter(|b| !b.trim().is_empty())
        .or_else(|| {
            meta.first_of(&["article:author", "author", "og:author"])
                .map(collapse_whitespace)
        })
}

/// Publication name from the sender domain's first label, falling back to
/// `og:site_name`. `news@substack.com` gives `Substack`.
pub fn extract_publication(from_email: &str, meta: &MetaTags) -> Option<String> {
    sender_domain(from_email)
        .and_then(|domain| domain.split('.').next().map(capitalize))
        .filter(|name| !name.is_empty())
        .or_else(|| meta.get("og:site_name").map(collapse_whitespace))
}

/// Lowercased domain part of an address; accepts `Name <addr>` forms.
pub fn sender_domain(address: &str) -> Option<String> {
    let email = match (address.find('<'), address.rfind('>')) {
        (Some(start), Some(end)) if start < end => &address[start + 1..end],
        _ => address.trim(),
    };

    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|domain| !domain.is_empty())
}

/// Upper-case the first character and leave the rest alone.
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Whole minutes to read `words`, never less than one.
pub fn estimated_read_time(words: usize) -> u32 {
    let minutes = words.div_ceil(WORDS_PER_MINUTE).max(1);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

/// Meta description if the sender provided one, else a truncated lead.
pub fn extract_excerpt(text: &str, meta: &MetaTags) -> Option<String> {
    if let Some(description) = meta.first_of(&["description", "og:description"]) {
        return Some(collapse_whitespace(description));
    }

    let collapsed = collapse_whitespace(text);
    if collapsed.is_empty() {
        return None;
    }
    Some(truncate_excerpt(&collapsed, EXCERPT_CHARS))
}

/// Cut `text` to at most `limit` characters at a word boundary and append
/// `...`. Text that already fits is returned verbatim.
pub fn truncate_excerpt(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let cut: String = text.chars().take(limit).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(boundary) if boundary > 0 => &cut[..boundary],
        _ => cut.as_str(),
    };

    format!("{}...", trimmed.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_time_table() {
        assert_eq!(estimated_read_time(0), 1);
        assert_eq!(estimated_read_time(1), 1);
        assert_eq!(estimated_read_time(199), 1);
        // ceil(words / 200): a full 200 words is still one minute.
        assert_eq!(estimated_read_time(200), 1);
        assert_eq!(estimated_read_time(201), 2);
        assert_eq!(estimated_read_time(399), 2);
        assert_eq!(estimated_read_time(400), 2);
        assert_eq!(estimated_read_time(401), 3);
        assert_eq!(estimated_read_time(10_000), 50);
    }

    #[test]
    fn test_excerpt_short_text_verbatim() {
        assert_eq!(truncate_excerpt("short text", 200), "short text");
        let exact = "a".repeat(200);
        assert_eq!(truncate_excerpt(&exact, 200), exact);
    }

    #[test]
    fn test_excerpt_truncates_at_word_boundary() {
        let text = "word ".repeat(100);
        let excerpt = truncate_excerpt(text.trim(), 200);
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.chars().count() <= 203);
        assert!(excerpt.trim_end_matches("...").ends_with("word"));
    }

    #[test]
    fn test_excerpt_single_long_token() {
        let text = "x".repeat(500);
        let excerpt = truncate_excerpt(&text, 200);
        assert_eq!(excerpt.chars().count(), 203);
    }

    #[test]
    fn test_excerpt_multibyte() {
        let text = "é".repeat(300);
        let excerpt = truncate_excerpt(&text, 200);
        assert_eq!(excerpt.chars().count(), 203);
    }

    #[test]
    fn test_publication_from_domain() {
        let meta = MetaTags::default();
        assert_eq!(
            extract_publication("news@substack.com", &meta).as_deref(),
            Some("Substack")
        );
        assert_eq!(
            extract_publication("Morning Brew <crew@morningbrew.com>", &meta).as_deref(),
            Some("Morningbrew")
        );
    }

    #[test]
    fn test_publication_falls_back_to_site_name() {
        let doc = Html::parse_document(
            r#"<html><head><meta property="og:site_name" content="The Daily"></head></html>"#,
        );
        let meta = MetaTags::from_document(&doc);
        assert_eq!(
            extract_publication("not-an-address", &meta).as_deref(),
            Some("The Daily")
        );
    }

    #[test]
    fn test_author_priority() {
        let doc = Html::parse_document(
            r#"<head><meta name="author" content="Meta Author"><meta property="article:author" content="Article Author"></head>"#,
        );
        let meta = MetaTags::from_document(&doc);
        assert_eq!(
            extract_author(None, &meta).as_deref(),
            Some("Article Author")
        );
        assert_eq!(
            extract_author(Some("By Byline".into()), &meta).as_deref(),
            Some("By Byline")
        );
        assert_eq!(extract_author(None, &MetaTags::default()), None);
    }

    #[test]
    fn test_title_sources() {
        let doc = Html::parse_document(
            "<html><head><title> Weekly  Digest </title></head><body><h1>Heading</h1></body></html>",
        );
        let meta = MetaTags::from_document(&doc);
        assert_eq!(extract_title(&doc, &meta).as_deref(), Some("Weekly Digest"));

        let doc = Html::parse_document("<body><h1>Heading</h1></body>");
        let meta = MetaTags::from_document(&doc);
        assert_eq!(extract_title(&doc, &meta).as_deref(), Some("Heading"));
    }

    #[test]
    fn test_sender_domain() {
        assert_eq!(sender_domain("a@Example.ORG").as_deref(), Some("example.org"));
        assert_eq!(sender_domain("Name <a@b.co>").as_deref(), Some("b.co"));
        assert_eq!(sender_domain("nobody"), None);
    }
}
