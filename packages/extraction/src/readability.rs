//! Main-content detection.
//!
//! A reduced version of the classic readability scoring pass: paragraphs
//! vote for their ancestors, ancestors are weighted by tag and class hints
//! and penalised for link density, and the best candidate (plus any sibling
//! blocks that look like part of the same article) becomes the article.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use scraper::node::Node;
use scraper::ElementRef;

use crate::sanitize::{collapse_whitespace, is_forbidden_tag, Rendered, Renderer};

/// Paragraph-like blocks shorter than this do not vote.
const MIN_PARAGRAPH_CHARS: usize = 25;

/// How many ancestor levels a paragraph's score propagates to.
const SCORE_DEPTH: usize = 3;

/// Bylines longer than this are body text, not bylines.
const MAX_BYLINE_CHARS: usize = 100;

lazy_static! {
    static ref UNLIKELY: Regex = Regex::new(
        r"(?i)-ad-|ai2html|banner|breadcrumbs|combx|comment|community|cover-wrap|disqus|extra|footer|gdpr|header|legends|menu|related|remark|replies|rss|shoutbox|sidebar|skyscraper|social|sponsor|supplemental|ad-break|agegate|pagination|pager|popup|preheader|unsubscribe|preferences|share"
    ).unwrap();

    static ref MAYBE_CANDIDATE: Regex =
        Regex::new(r"(?i)and|article|body|column|content|main|shadow").unwrap();

    static ref POSITIVE: Regex = Regex::new(
        r"(?i)article|body|content|entry|hentry|h-entry|main|page|post|text|blog|story"
    ).unwrap();

    static ref NEGATIVE: Regex = Regex::new(
        r"(?i)-ad-|hidden|^hid$| hid$| hid |^hid |banner|combx|comment|com-|contact|foot|footer|footnote|gdpr|masthead|media|meta|outbrain|promo|related|scroll|share|shoutbox|sidebar|skyscraper|sponsor|shopping|tags|tool|widget|unsubscribe"
    ).unwrap();

    static ref BYLINE: Regex = Regex::new(r"(?i)byline|author|dateline|writtenby|p-author").unwrap();

    static ref TRACKER_SRC: Regex = Regex::new(r"(?i)track|pixel|beacon|/open[/.?]").unwrap();
}

const UNLIKELY_ROLES: &[&str] = &[
    "menu",
    "menubar",
    "complementary",
    "navigation",
    "alert",
    "alertdialog",
    "dialog",
];

const PARAGRAPH_TAGS: &[&str] = &["p", "pre", "td", "blockquote", "li"];

/// Combined `class` and `id` attribute, the string readability matches hints against.
fn match_string(el: ElementRef<'_>) -> String {
    let value = el.value();
    format!(
        "{} {}",
        value.attr("class").unwrap_or_default(),
        value.attr("id").unwrap_or_default()
    )
}

pub fn is_hidden(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if value.attr("hidden").is_some() {
        return true;
    }
    if value
        .attr("aria-hidden")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return true;
    }
    match value.attr("style") {
        Some(style) => {
            let style: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();
            style.contains("display:none") || style.contains("visibility:hidden")
        }
        None => false,
    }
}

/// Images that exist only to report opens.
pub fn is_tracking_pixel(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if value.name() != "img" {
        return false;
    }

    let tiny = |attr: &str| {
        value
            .attr(attr)
            .map(|v| matches!(v.trim().trim_end_matches("px"), "0" | "1"))
            .unwrap_or(false)
    };
    if tiny("width") || tiny("height") {
        return true;
    }

    if let Some(style) = value.attr("style") {
        let style: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        if style.contains("width:1px") || style.contains("height:1px") || style.contains("width:0") {
            return true;
        }
    }

    value
        .attr("src")
        .map(|src| TRACKER_SRC.is_match(src))
        .unwrap_or(false)
}

/// Navigation, footers, share bars and similar template furniture.
pub fn is_unlikely_candidate(el: ElementRef<'_>) -> bool {
    let value = el.value();
    let name = value.name();

    if matches!(name, "body" | "html" | "a" | "article" | "main") {
        return false;
    }
    if matches!(name, "nav" | "aside" | "footer") {
        return true;
    }
    if value
        .attr("role")
        .is_some_and(|role| UNLIKELY_ROLES.contains(&role))
    {
        return true;
    }

    let hints = match_string(el);
    UNLIKELY.is_match(&hints) && !MAYBE_CANDIDATE.is_match(&hints)
}

/// Everything excluded from both scoring and output.
pub fn skip_node(el: ElementRef<'_>) -> bool {
    is_hidden(el) || is_tracking_pixel(el) || is_unlikely_candidate(el)
}

fn class_weight(el: ElementRef<'_>) -> f64 {
    let mut weight = 0.0;
    let value = el.value();

    if let Some(class) = value.attr("class") {
        if NEGATIVE.is_match(class) {
            weight -= 25.0;
        }
        if POSITIVE.is_match(class) {
            weight += 25.0;
        }
    }
    if let Some(id) = value.attr("id") {
        if NEGATIVE.is_match(id) {
            weight -= 25.0;
        }
        if POSITIVE.is_match(id) {
            weight += 25.0;
        }
    }

    weight
}

fn initial_score(el: ElementRef<'_>) -> f64 {
    let tag_score = match el.value().name() {
        "div" | "article" | "main" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    };
    tag_score + class_weight(el)
}

/// Visible character count and the portion of it inside links.
#[derive(Debug, Default, Clone, Copy)]
struct TextStats {
    chars: usize,
    link_chars: usize,
}

fn text_stats(el: ElementRef<'_>) -> TextStats {
    fn walk(el: ElementRef<'_>, in_link: bool, stats: &mut TextStats) {
        let in_link = in_link || el.value().name() == "a";
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    let count = text.trim().chars().count();
                    stats.chars += count;
                    if in_link {
                        stats.link_chars += count;
                    }
                }
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        let name = child_el.value().name();
                        if !is_forbidden_tag(name) && !skip_node(child_el) {
                            walk(child_el, in_link, stats);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut stats = TextStats::default();
    walk(el, false, &mut stats);
    stats
}

fn link_density(el: ElementRef<'_>) -> f64 {
    let stats = text_stats(el);
    if stats.chars == 0 {
        return 0.0;
    }
    stats.link_chars as f64 / stats.chars as f64
}

/// Visible text of an element, whitespace collapsed.
pub fn visible_text(el: ElementRef<'_>) -> String {
    let mut renderer = Renderer::new(skip_node);
    renderer.children(el);
    collapse_whitespace(&renderer.finish().text)
}

fn collect_paragraphs<'a>(el: ElementRef<'a>, out: &mut Vec<ElementRef<'a>>) {
    for child in el.children() {
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child_el.value().name();
        if is_forbidden_tag(name) || skip_node(child_el) {
            continue;
        }
        if PARAGRAPH_TAGS.contains(&name) {
            out.push(child_el);
        }
        collect_paragraphs(child_el, out);
    }
}

fn parent_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.parent().and_then(ElementRef::wrap)
}

/// Score candidates under `body` and return the top one with its score.
fn top_candidate<'a>(body: ElementRef<'a>) -> Option<(ElementRef<'a>, f64, Vec<(ElementRef<'a>, f64)>)> {
    let mut paragraphs = Vec::new();
    collect_paragraphs(body, &mut paragraphs);

    let mut scores = HashMap::new();
    for paragraph in paragraphs {
        let text = visible_text(paragraph);
        let length = text.chars().count();
        if length < MIN_PARAGRAPH_CHARS {
            continue;
        }

        let commas = text.matches(',').count() as f64;
        let content_score = 1.0 + commas + (length as f64 / 100.0).floor().min(3.0);

        let mut ancestor = parent_element(paragraph);
        for level in 0..SCORE_DEPTH {
            let Some(node) = ancestor else {
                break;
            };
            if node.value().name() == "html" {
                break;
            }
            let divider = match level {
                0 => 1.0,
                1 => 2.0,
                _ => level as f64 * 3.0,
            };
            let entry = scores
                .entry(node.id())
                .or_insert_with(|| (node, initial_score(node)));
            entry.1 += content_score / divider;
            ancestor = parent_element(node);
        }
    }

    let ranked: Vec<(ElementRef<'a>, f64)> = scores
        .into_values()
        .map(|(el, score)| (el, score * (1.0 - link_density(el))))
        .collect();

    let (top, top_score) = ranked
        .iter()
        .copied()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    Some((top, top_score, ranked))
}

/// Pick the article content under `body`, or `None` when nothing scored.
pub fn grab_article(body: ElementRef<'_>) -> Option<Rendered> {
    let (top, top_score, ranked) = top_candidate(body)?;

    let parent = match parent_element(top) {
        Some(parent) if parent.value().name() != "html" => parent,
        _ => {
            // Top candidate is <body> itself
            let mut renderer = Renderer::new(skip_node);
            renderer.children(top);
            let rendered = renderer.finish();
            return Some(Rendered {
                html: format!("<div>{}</div>", rendered.html),
                text: rendered.text,
            });
        }
    };

    let threshold = (top_score * 0.2).max(10.0);
    let score_of = |el: ElementRef<'_>| {
        ranked
            .iter()
            .find(|(candidate, _)| *candidate == el)
            .map(|(_, score)| *score)
    };

    let mut renderer = Renderer::new(skip_node);
    for sibling in parent.children().filter_map(ElementRef::wrap) {
        let include = if sibling == top {
            true
        } else if score_of(sibling).is_some_and(|score| score >= threshold) {
            true
        } else if sibling.value().name() == "p" {
            let text = visible_text(sibling);
            let length = text.chars().count();
            let density = link_density(sibling);
            (length > 80 && density < 0.25)
                || (length > 0 && density == 0.0 && text.contains(". "))
        } else {
            false
        };

        if include {
            renderer.element(sibling);
        }
    }

    let rendered = renderer.finish();
    Some(Rendered {
        html: format!("<div>{}</div>", rendered.html),
        text: rendered.text,
    })
}

/// A short author line inside the body, if one is marked up as such.
pub fn find_byline(body: ElementRef<'_>) -> Option<String> {
    fn walk(el: ElementRef<'_>) -> Option<String> {
        for child in el.children().filter_map(ElementRef::wrap) {
            if is_forbidden_tag(child.value().name()) || is_hidden(child) {
                continue;
            }
            if is_byline(child) {
                let text = visible_text(child);
                let length = text.chars().count();
                if length > 0 && length <= MAX_BYLINE_CHARS {
                    return Some(text);
                }
            }
            if let Some(found) = walk(child) {
                return Some(found);
            }
        }
        None
    }

    walk(body)
}

fn is_byline(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if value.attr("rel") == Some("author") {
        return true;
    }
    if value
        .attr("itemprop")
        .is_some_and(|prop| prop.contains("author"))
    {
        return true;
    }
    BYLINE.is_match(&match_string(el))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn first<'a>(doc: &'a Html, css: &str) -> ElementRef<'a> {
        let selector = Selector::parse(css).unwrap();
        doc.select(&selector).next().unwrap()
    }

    const LONG: &str = "This is a reasonably long paragraph, with commas, that should count as real content for scoring purposes.";

    #[test]
    fn test_article_beats_navigation() {
        let html = format!(
            r#"<body>
                <div class="menu"><a href="/a">Home</a> <a href="/b">About</a></div>
                <div class="post-content"><p>{LONG}</p><p>{LONG}</p><p>{LONG}</p></div>
                <div class="footer"><p>You are receiving this email because you subscribed, unsubscribe here.</p></div>
            </body>"#
        );
        let doc = Html::parse_document(&html);
        let article = grab_article(first(&doc, "body")).unwrap();
        assert!(article.text.contains("reasonably long paragraph"));
        assert!(!article.text.contains("Home"));
        assert!(!article.text.contains("receiving this email"));
    }

    #[test]
    fn test_no_candidates() {
        let doc = Html::parse_document("<body><span>short</span></body>");
        assert!(grab_article(first(&doc, "body")).is_none());
    }

    #[test]
    fn test_tracking_pixels() {
        let doc = Html::parse_document(
            r#"<body>
                <img id="a" src="https://x.test/logo.png" width="600">
                <img id="b" src="https://x.test/logo.png" width="1" height="1">
                <img id="c" src="https://links.example.com/track/open?id=1">
                <img id="d" src="https://x.test/p.gif" style="width: 1px; height: 1px">
            </body>"#,
        );
        assert!(!is_tracking_pixel(first(&doc, "#a")));
        assert!(is_tracking_pixel(first(&doc, "#b")));
        assert!(is_tracking_pixel(first(&doc, "#c")));
        assert!(is_tracking_pixel(first(&doc, "#d")));
    }

    #[test]
    fn test_hidden_preheader_skipped() {
        let doc = Html::parse_document(
            r#"<body><div id="pre" style="display: none">preview text</div><p id="p">x</p></body>"#,
        );
        assert!(is_hidden(first(&doc, "#pre")));
        assert!(!is_hidden(first(&doc, "#p")));
    }

    #[test]
    fn test_unlikely_keeps_content_wrappers() {
        let doc = Html::parse_document(
            r#"<body><div id="a" class="header-content">x</div><div id="b" class="site-header">y</div><nav id="c">z</nav></body>"#,
        );
        assert!(!is_unlikely_candidate(first(&doc, "#a")));
        assert!(is_unlikely_candidate(first(&doc, "#b")));
        assert!(is_unlikely_candidate(first(&doc, "#c")));
    }

    #[test]
    fn test_find_byline() {
        let doc = Html::parse_document(
            r#"<body><h1>Title</h1><span class="byline">By Jane Doe</span><p>Body</p></body>"#,
        );
        assert_eq!(find_byline(first(&doc, "body")).as_deref(), Some("By Jane Doe"));
    }

    #[test]
    fn test_find_byline_ignores_long_blocks() {
        let long = "word ".repeat(40);
        let html = format!(r#"<body><div class="author-bio">{long}</div></body>"#);
        let doc = Html::parse_document(&html);
        assert_eq!(find_byline(first(&doc, "body")), None);
    }
}
