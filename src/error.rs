//! Error types for the record ingestion pipeline.
//!
//! Failures are scoped to the operation that raised them: a fetch error
//! aborts the current search round, a rejected import writes nothing, and
//! the dataset is always left in its last-good state.

use thiserror::Error;

/// Error raised by a fetch, import or dataset operation.
#[derive(Debug, Error)]
pub enum LivrevError {
    /// Request to a literature API or article page failed
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Malformed efetch XML, Atom feed or article page
    #[error("Parse error: {0}")]
    Parse(String),

    /// Remote service asked us to back off
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Literature API returned a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status or service error code
        code: i32,
        /// Error message from API
        message: String,
    },

    /// Dataset or upload file I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed esearch or OpenAlex JSON payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Dataset or upload CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Rejected input (empty query, missing title column, blank database name)
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `LivrevError`
pub type Result<T> = std::result::Result<T, LivrevError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| LivrevError::Parse(msg.to_string()))
    }
}
