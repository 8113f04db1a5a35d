//! Error types for network fetches and artifact validation.
//!
//! This module defines structured errors for every external call the
//! pipeline makes, providing context-rich messages for stage-level failure
//! reporting.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching remote resources.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// Response body could not be decoded as the expected shape.
    #[error("unexpected response body from {url}: {reason}")]
    BadBody {
        /// The URL whose body failed to decode.
        url: String,
        /// What was wrong with the body.
        reason: String,
    },

    /// Downloaded artifact failed content validation.
    #[error("invalid content from {url}: {reason}")]
    InvalidContent {
        /// The URL the artifact came from.
        url: String,
        /// Validation failure detail.
        reason: String,
    },

    /// File system error while persisting an artifact.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl FetchError {
    /// Creates an error from a reqwest failure, mapping timeouts explicitly.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error carrying a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a bad-body error.
    pub fn bad_body(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadBody {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a content-validation error.
    pub fn invalid_content(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidContent {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true if the error is a 404 response.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 404, .. })
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or
// `From<std::io::Error>` because our error variants require context (url,
// path) that the source errors don't provide. The helper constructors are
// the pattern here, letting callers attach that context.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_includes_url() {
        let error = FetchError::timeout("https://example.com/doc.pdf");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/doc.pdf"));
    }

    #[test]
    fn test_http_status_display() {
        let error = FetchError::http_status("https://example.com/doc.pdf", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/doc.pdf"));
    }

    #[test]
    fn test_is_not_found_matches_404_only() {
        assert!(FetchError::http_status("u", 404).is_not_found());
        assert!(!FetchError::http_status("u", 500).is_not_found());
        assert!(!FetchError::timeout("u").is_not_found());
    }

    #[test]
    fn test_invalid_content_display() {
        let error = FetchError::invalid_content("https://m.example/x", "missing PDF signature");
        let msg = error.to_string();
        assert!(msg.contains("invalid content"));
        assert!(msg.contains("missing PDF signature"));
    }

    #[test]
    fn test_io_display_includes_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = FetchError::io(PathBuf::from("/tmp/test.pdf"), io_error);
        assert!(error.to_string().contains("/tmp/test.pdf"));
    }
}
