//! Error types for the directory crawler and query service.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Errors that can occur while crawling or querying the directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Browser or DevTools protocol failure.
    #[error("Browser error: {0}")]
    Browser(String),

    /// A bounded wait ran out before its condition held.
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// The timeout that expired.
        after: Duration,
    },

    /// Failed to parse markup or a selector.
    #[error("Failed to parse: {0}")]
    Parse(String),

    /// Filter discovery produced nothing to crawl.
    #[error("No filter values found to crawl")]
    NoFilters,

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Client supplied an invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dataset file could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl DirectoryError {
    /// Builds a timeout error for the named wait.
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Returns true if this error is a bounded-wait timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_timeout() {
        let err = DirectoryError::timeout("grid table", Duration::from_secs(30));
        assert_eq!(err.to_string(), "Timed out after 30s waiting for grid table");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_error_display_no_filters() {
        let err = DirectoryError::NoFilters;
        assert_eq!(err.to_string(), "No filter values found to crawl");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_error_display_browser() {
        let err = DirectoryError::Browser("tab crashed".to_string());
        assert_eq!(err.to_string(), "Browser error: tab crashed");
    }

    #[test]
    fn test_error_display_invalid_request() {
        let err = DirectoryError::InvalidRequest("size must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid request: size must be positive");
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DirectoryError = io.into();
        assert!(matches!(err, DirectoryError::Io(_)));
    }
}
