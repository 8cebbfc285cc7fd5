//! Article extraction entry point.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExtractionError, Result};
use crate::metadata::{
    estimated_read_time, extract_author, extract_excerpt, extract_publication, extract_title,
    word_count, MetaTags,
};
use crate::readability::{find_byline, grab_article, skip_node};
use crate::sanitize::{escape_text, Rendered, Renderer};

/// Inputs larger than this are rejected before parsing.
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// Element nesting the readability walk will descend into.
pub const MAX_DEPTH: usize = 256;

/// Start tags accepted in one document. Bounds parse and scoring work.
pub const MAX_ELEMENTS: usize = 50_000;

/// Reader-view representation of one email.
///
/// `clean_content` is always sanitized markup; raw input never reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleContent {
    pub title: Option<String>,
    pub author: Option<String>,
    pub publication: Option<String>,
    pub clean_content: String,
    pub text_content: String,
    pub excerpt: Option<String>,
    pub estimated_read_time: u32,
    pub word_count: usize,
}

/// Sanitize `html`, locate the main article, and derive its metadata.
///
/// Parsing is best-effort: malformed markup never fails extraction. The only
/// failure for well-sized input is a document with nothing left to show.
/// Documents over the size, element or nesting budget are rejected up front.
pub fn extract(html: &str, from_email: &str) -> Result<ArticleContent> {
    if html.len() > MAX_DOCUMENT_BYTES {
        return Err(ExtractionError::TooLarge {
            size: html.len(),
            limit: MAX_DOCUMENT_BYTES,
        });
    }

    let elements = count_start_tags(html);
    if elements > MAX_ELEMENTS {
        return Err(ExtractionError::TooComplex {
            elements,
            limit: MAX_ELEMENTS,
        });
    }

    let source = if looks_like_markup(html) {
        html.to_string()
    } else {
        text_to_html(html)
    };

    let doc = Html::parse_document(&source);
    check_depth(&doc)?;

    let meta = MetaTags::from_document(&doc);
    let body = body_element(&doc);

    let rendered = match grab_article(body) {
        Some(article) if !article.text.is_empty() => article,
        _ => {
            debug!("no article candidate, using whole body");
            let mut renderer = Renderer::new(skip_node);
            renderer.children(body);
            renderer.finish()
        }
    };

    if rendered.is_empty() {
        return Err(ExtractionError::NoContent);
    }

    let Rendered { html: clean_content, text: text_content } = rendered;
    let words = word_count(&text_content);

    let article = ArticleContent {
        title: extract_title(&doc, &meta),
        author: extract_author(find_byline(body), &meta),
        publication: extract_publication(from_email, &meta),
        excerpt: extract_excerpt(&text_content, &meta),
        estimated_read_time: estimated_read_time(words),
        word_count: words,
        clean_content,
        text_content,
    };

    debug!(
        words = article.word_count,
        read_time = article.estimated_read_time,
        has_title = article.title.is_some(),
        "extracted article"
    );

    Ok(article)
}

fn body_element(doc: &Html) -> ElementRef<'_> {
    Selector::parse("body")
        .ok()
        .and_then(|selector| doc.select(&selector).next())
        .unwrap_or_else(|| doc.root_element())
}

/// Upper bound on the elements the parser will build: every `<` that opens a tag.
fn count_start_tags(html: &str) -> usize {
    html.as_bytes()
        .windows(2)
        .filter(|pair| pair[0] == b'<' && pair[1].is_ascii_alphabetic())
        .count()
}

/// The renderer and scorers recurse per element, so nesting must be bounded
/// before they run. Both iterators used here walk the arena without recursion.
fn check_depth(doc: &Html) -> Result<()> {
    let too_deep = doc
        .root_element()
        .descendants()
        .any(|node| node.ancestors().take(MAX_DEPTH + 1).count() > MAX_DEPTH);

    if too_deep {
        return Err(ExtractionError::TooDeep { limit: MAX_DEPTH });
    }
    Ok(())
}

fn looks_like_markup(input: &str) -> bool {
    input.contains('<') && input.contains('>')
}

/// Wrap plain-text bodies in paragraphs so they render like the HTML ones.
fn text_to_html(text: &str) -> String {
    let mut html = String::from("<body>");
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        html.push_str("<p>");
        for (i, line) in paragraph.lines().enumerate() {
            if i > 0 {
                html.push_str("<br>");
            }
            escape_text(line.trim(), &mut html);
        }
        html.push_str("</p>");
    }
    html.push_str("</body>");
    html
}
