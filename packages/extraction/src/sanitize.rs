//! Sanitizing serializer.
//!
//! Walks a parsed DOM and writes it back out as markup that is safe to embed
//! in a reader view, collecting the visible text along the way. Nothing from
//! the input reaches the output without passing through [`Renderer`], so
//! escaping and the tag/attribute rules live in one place.

use scraper::node::Node;
use scraper::ElementRef;

/// Elements dropped together with everything inside them.
const FORBIDDEN_TAGS: &[&str] = &[
    "script", "iframe", "frame", "frameset", "embed", "object", "applet", "style", "noscript",
    "template", "base", "link", "meta", "title", "head",
];

/// Attributes dropped regardless of value. `on*` handlers are handled separately.
const FORBIDDEN_ATTRS: &[&str] = &["style", "srcdoc", "formaction"];

/// Attributes whose values are fetched or navigated to by a browser.
const URL_ATTRS: &[&str] = &[
    "href",
    "src",
    "action",
    "background",
    "poster",
    "cite",
    "longdesc",
    "lowsrc",
    "dynsrc",
];

const VOID_TAGS: &[&str] = &[
    "area", "br", "col", "hr", "img", "input", "param", "source", "track", "wbr",
];

const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "br",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "figure",
    "footer",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "tbody",
    "td",
    "tfoot",
    "th",
    "thead",
    "tr",
    "ul",
];

pub fn is_forbidden_tag(name: &str) -> bool {
    FORBIDDEN_TAGS.contains(&name)
}

pub(crate) fn is_block_tag(name: &str) -> bool {
    BLOCK_TAGS.contains(&name)
}

/// Whether an attribute may be copied to sanitized output.
pub fn is_safe_attribute(name: &str, value: &str) -> bool {
    let name = name.to_ascii_lowercase();

    if name.starts_with("on") || FORBIDDEN_ATTRS.contains(&name.as_str()) {
        return false;
    }
    if !is_valid_attribute_name(&name) {
        return false;
    }
    if name == "srcset" {
        let normalized = normalize_url(value);
        return !(normalized.contains("javascript:")
            || normalized.contains("vbscript:")
            || normalized.contains("data:"));
    }
    if URL_ATTRS.contains(&name.as_str()) {
        return is_safe_url(&name, value);
    }
    true
}

fn is_safe_url(attr: &str, value: &str) -> bool {
    let normalized = normalize_url(value);

    if normalized.starts_with("javascript:") || normalized.starts_with("vbscript:") {
        return false;
    }
    if normalized.starts_with("data:") {
        // Raster images only; SVG documents can carry script
        return attr == "src"
            && normalized.starts_with("data:image/")
            && !normalized.starts_with("data:image/svg");
    }
    true
}

/// Browsers ignore embedded whitespace and control characters when resolving
/// a scheme, so `java\tscript:` must be treated like `javascript:`.
fn normalize_url(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn is_valid_attribute_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

pub(crate) fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

pub(crate) fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

/// Sanitized markup plus the visible text it contains.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub html: String,
    pub text: String,
}

impl Rendered {
    pub fn is_empty(&self) -> bool {
        self.html.trim().is_empty() && self.text.trim().is_empty()
    }
}

/// Serializes element subtrees, skipping forbidden tags and anything the
/// caller-supplied filter rejects.
pub struct Renderer<F> {
    skip: F,
    html: String,
    text: String,
}

impl<F> Renderer<F>
where
    F: Fn(ElementRef<'_>) -> bool,
{
    pub fn new(skip: F) -> Self {
        Self {
            skip,
            html: String::new(),
            text: String::new(),
        }
    }

    /// Render an element including its own tag.
    pub fn element(&mut self, el: ElementRef<'_>) {
        let name = el.value().name();
        if is_forbidden_tag(name) || (self.skip)(el) {
            return;
        }

        let block = is_block_tag(name);
        if block {
            self.text.push('\n');
        }

        self.html.push('<');
        self.html.push_str(name);
        for (attr, value) in el.value().attrs() {
            if is_safe_attribute(attr, value) {
                self.html.push(' ');
                self.html.push_str(&attr.to_ascii_lowercase());
                self.html.push_str("=\"");
                escape_attribute(value, &mut self.html);
                self.html.push('"');
            }
        }
        self.html.push('>');

        if !VOID_TAGS.contains(&name) {
            self.children(el);
            self.html.push_str("</");
            self.html.push_str(name);
            self.html.push('>');
        }

        if block {
            self.text.push('\n');
        }
    }

    /// Render only the children of an element (used for `<body>`).
    pub fn children(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    escape_text(text, &mut self.html);
                    self.text.push_str(text);
                }
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.element(child_el);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn finish(self) -> Rendered {
        Rendered {
            html: self.html.trim().to_string(),
            text: normalize_text(&self.text),
        }
    }
}

/// Collapse runs of whitespace inside lines and keep at most one blank line
/// between paragraphs.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0usize;

    for line in raw.lines() {
        let collapsed = collapse_whitespace(line);
        if collapsed.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        blank_run = 0;
    }

    out
}

/// Join whitespace-separated tokens with single spaces. Treats NBSP as space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
