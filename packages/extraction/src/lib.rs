//! Newsletter Article Extraction Library
//!
//! Turns the raw, untrusted HTML of an inbound email into a sanitized reader
//! view plus the metadata a reading list needs (title, author, publication,
//! excerpt, read time).
//!
//! # Usage
//!
//! ```rust
//! let html = "<html><head><title>Issue 12</title></head><body><p>Hello, readers.</p></body></html>";
//! let article = extraction::extract(html, "editor@substack.com").unwrap();
//!
//! assert_eq!(article.title.as_deref(), Some("Issue 12"));
//! assert_eq!(article.publication.as_deref(), Some("Substack"));
//! assert_eq!(article.estimated_read_time, 1);
//! ```
//!
//! # Modules
//!
//! - [`sanitize`] - Tag/attribute policy and the escaping serializer
//! - [`readability`] - Main-content scoring, boilerplate and tracker removal
//! - [`metadata`] - Meta tags, read time, excerpt, publication, author
//! - [`platform`] - Sending-platform fingerprinting

mod article;
pub mod error;
pub mod metadata;
pub mod platform;
pub mod readability;
pub mod sanitize;

pub use article::{extract, ArticleContent, MAX_DEPTH, MAX_DOCUMENT_BYTES, MAX_ELEMENTS};
pub use error::{ExtractionError, Result};
pub use platform::{detect_platform, Platform};
