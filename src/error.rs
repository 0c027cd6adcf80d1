//! Custom error types for refspecies.
//!
//! The variants follow the failure taxonomy of a traversal run: configuration
//! errors are fatal before any work starts, everything scoped to a single
//! document or citation is recoverable and only ever counted, and service
//! errors are split into transient (retried) and permanent (skipped).

use std::time::Duration;
use thiserror::Error;

/// Main error type for refspecies operations.
#[derive(Debug, Error)]
pub enum RefSpeciesError {
    /// Missing or invalid invocation parameter
    #[error("Config error: {0}")]
    Config(String),

    /// The seed paper could not be read, so no output can be produced
    #[error("Seed paper unreadable: {0}")]
    SeedUnreadable(String),

    /// Both PDF extraction strategies failed for a document
    #[error("Text extraction failed: {0}")]
    TextExtraction(String),

    /// A citation could not be mapped to a document
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionFailure),

    /// Retryable service failure (rate limit, timeout, 5xx, connection)
    #[error("Transient service error: {0}")]
    Transient(#[from] TransientKind),

    /// Non-retryable service failure
    #[error("Service error: {code} - {message}")]
    Permanent {
        /// HTTP status (0 when not applicable)
        code: u16,
        /// Error message from the service
        message: String,
    },

    /// Payload could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a citation did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    /// The service has no record matching the citation
    #[error("no match for citation")]
    NotFound,
    /// Neither a DOI nor a usable title could be derived from the citation
    #[error("citation has no usable identifier or title")]
    Malformed,
    /// The citation (or its resolved title) matched none of the keywords
    #[error("citation rejected by keyword filter")]
    Filtered,
}

/// Flavours of transient failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransientKind {
    /// HTTP 429, with the server's Retry-After hint when present
    #[error("rate limited")]
    RateLimited(Option<Duration>),
    /// The request or the local operation exceeded its deadline
    #[error("timed out")]
    Timeout,
    /// Connection-level failure
    #[error("network: {0}")]
    Network(String),
    /// HTTP 5xx
    #[error("server error {0}")]
    Server(u16),
}

impl RefSpeciesError {
    /// Classification used by [`crate::retry::RetryPolicy`].
    pub fn is_transient(&self) -> bool {
        matches!(self, RefSpeciesError::Transient(_))
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RefSpeciesError::Transient(TransientKind::RateLimited(hint)) => *hint,
            _ => None,
        }
    }

    /// Map a non-success HTTP status to transient or permanent.
    pub fn from_status(status: reqwest::StatusCode, retry_after: Option<Duration>, body: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return RefSpeciesError::Transient(TransientKind::RateLimited(retry_after));
        }
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::GATEWAY_TIMEOUT
        {
            return RefSpeciesError::Transient(TransientKind::Timeout);
        }
        if status.is_server_error() {
            return RefSpeciesError::Transient(TransientKind::Server(status.as_u16()));
        }
        let preview: String = body.chars().take(300).collect();
        RefSpeciesError::Permanent {
            code: status.as_u16(),
            message: preview,
        }
    }
}

impl From<reqwest::Error> for RefSpeciesError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return RefSpeciesError::Transient(TransientKind::Timeout);
        }
        if e.is_connect() || e.is_request() {
            return RefSpeciesError::Transient(TransientKind::Network(e.to_string()));
        }
        if let Some(status) = e.status() {
            return RefSpeciesError::from_status(status, None, &e.to_string());
        }
        if e.is_decode() {
            return RefSpeciesError::Parse(e.to_string());
        }
        RefSpeciesError::Transient(TransientKind::Network(e.to_string()))
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a non-success response into the matching error, consuming the body.
pub async fn error_from_response(response: reqwest::Response) -> RefSpeciesError {
    let status = response.status();
    let retry_after = retry_after_header(response.headers());
    let body = response.text().await.unwrap_or_default();
    RefSpeciesError::from_status(status, retry_after, &body)
}

/// Result type alias using `RefSpeciesError`
pub type Result<T> = std::result::Result<T, RefSpeciesError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| RefSpeciesError::Parse(msg.to_string()))
    }
}
