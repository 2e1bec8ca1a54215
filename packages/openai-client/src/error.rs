//! Error types for OpenAI client.

use thiserror::Error;

/// Result type for OpenAI client operations.
pub type Result<T> = std::result::Result<T, OpenAIError>;

/// OpenAI client errors.
///
/// Variants are already classified so callers never need to inspect
/// message text to decide whether a request is worth repeating.
#[derive(Debug, Error)]
pub enum OpenAIError {
    /// Configuration error (missing API key, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failed before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded the client timeout
    #[error("Request timed out")]
    Timeout,

    /// HTTP 429 or quota exhaustion
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The model refused, or the request tripped the content filter
    #[error("Content policy rejection: {0}")]
    ContentPolicy(String),

    /// Any other non-2xx response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid JSON or unexpected response shape
    #[error("Parse error: {0}")]
    Parse(String),
}

impl OpenAIError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let lowered = body.to_ascii_lowercase();
        if status == 429 || lowered.contains("insufficient_quota") {
            return OpenAIError::RateLimited(body.to_string());
        }
        if lowered.contains("content_policy_violation") || lowered.contains("content_filter") {
            return OpenAIError::ContentPolicy(body.to_string());
        }
        OpenAIError::Api {
            status,
            message: body.to_string(),
        }
    }

    /// Map a transport error from reqwest.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OpenAIError::Timeout
        } else {
            OpenAIError::Network(err.to_string())
        }
    }

    /// True when repeating the identical request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OpenAIError::Network(_) | OpenAIError::Timeout | OpenAIError::RateLimited(_)
        ) || matches!(self, OpenAIError::Api { status, .. } if *status >= 500)
    }
}
