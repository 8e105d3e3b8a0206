//! Typed errors for the filing extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Errors that stop a pipeline run.
///
/// Unit-level failures (missing filings, fetch errors, bad model output)
/// are recorded in the status table instead of surfacing here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No candidate model answered the capability probe
    #[error("no analysis model available (tried: {})", tried.join(", "))]
    NoModelAvailable { tried: Vec<String> },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A stage worker panicked or was aborted
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors from the filing fetch collaborator.
///
/// "No filing for this unit" is not an error; fetchers return `Ok(None)`.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Unexpected HTTP status on a required resource
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Response body could not be decoded
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    /// Local cache read/write failed
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classified failure of one call to the analysis service.
///
/// The classification drives the backoff applied before the next attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalystError {
    /// Quota or rate limit rejection
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Service temporarily unavailable
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Response was not a valid structured record
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Anything else (network errors, unexpected API errors)
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AnalystError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for analysis service calls.
pub type AnalystResult<T> = std::result::Result<T, AnalystError>;
