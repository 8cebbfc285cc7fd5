//! Typed errors for the extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can decide
//! on retry behaviour by matching variants.

use thiserror::Error;

/// Errors that can occur while extracting an article from email HTML.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Neither sanitized markup nor visible text survived extraction.
    #[error("Email has no content")]
    NoContent,

    /// Input exceeded the configured size limit
    #[error("document too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    /// Markup nested deeper than the extractor walks
    #[error("document nesting too deep: more than {limit} levels")]
    TooDeep { limit: usize },

    /// More elements than one extraction is allowed to visit
    #[error("document too complex: {elements} elements (limit {limit})")]
    TooComplex { elements: usize, limit: usize },
}

impl ExtractionError {
    /// Whether retrying with the same input could produce a different result.
    ///
    /// Extraction is deterministic, so every variant here is terminal.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;
