//! Network plumbing: HTTP client, rate limiting, retry, and PDF validation.
//!
//! Every external call the pipeline makes goes through this module: the
//! [`HttpClient`] wrapper, the per-service [`ServiceRateLimiter`], and the
//! [`with_retry`] combinator that composes both with exponential backoff.

pub mod client;
pub mod error;
pub mod rate_limiter;
pub mod retry;
pub mod validate;

pub use client::{BinaryResponse, HttpClient, PageResponse};
pub use error::FetchError;
pub use rate_limiter::ServiceRateLimiter;
pub use retry::{
    FailureType, RetryDecision, RetryPolicy, classify_error, parse_retry_after, with_retry,
};
pub use validate::{MIN_PDF_SIZE, PdfInfo, PdfValidationError, persist_validated_pdf,
    validate_pdf_bytes};
