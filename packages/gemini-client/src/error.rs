//! Error types for the Gemini client.

use thiserror::Error;

/// Result type for Gemini client operations.
pub type Result<T> = std::result::Result<T, GeminiError>;

/// Gemini client errors.
#[derive(Debug, Error)]
pub enum GeminiError {
    /// Configuration error (missing API key, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response)
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl GeminiError {
    /// Quota or rate limit rejection (HTTP 429 / `RESOURCE_EXHAUSTED`).
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Api { status, message } => {
                *status == 429 || mentions(message, &["resource_exhausted", "quota"])
            }
            _ => false,
        }
    }

    /// Temporary service outage (HTTP 503 / `UNAVAILABLE`).
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Api { status, message } => *status == 503 || mentions(message, &["unavailable"]),
            Self::Network(message) => mentions(message, &["503", "unavailable"]),
            _ => false,
        }
    }
}

fn mentions(message: &str, needles: &[&str]) -> bool {
    let lower = message.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}
