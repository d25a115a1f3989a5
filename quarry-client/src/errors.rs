//! Classified client failures

use quarry_resilience::Retryable;

/// Outcome code recorded for successful operations.
pub const CODE_OK: &str = "ok";

/// Error type for query service operations.
///
/// Every failure classifies to a stable code string via [`code`],
/// which doubles as the outcome dimension on recorded observations.
///
/// [`code`]: ClientError::code
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure, including the per-call timeout.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service classified the request as failed.
    #[error("query service returned {code}: {message}")]
    Status { code: String, message: String },

    /// The response body was not what the service's schema promises.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured target URL cannot be used.
    #[error("invalid target url: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    /// Stable classification code for observation labels.
    pub fn code(&self) -> &str {
        match self {
            ClientError::Transport(err) if err.is_timeout() => "deadline_exceeded",
            ClientError::Transport(_) => "transport_error",
            ClientError::Status { code, .. } => code,
            ClientError::Decode(_) => "decode_error",
            ClientError::Url(_) => "invalid_argument",
        }
    }
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            // Timeouts and connection failures are worth another try
            // within the budget.
            ClientError::Transport(_) => true,
            ClientError::Status { code, .. } => matches!(
                code.as_str(),
                "unavailable" | "deadline_exceeded" | "resource_exhausted" | "internal"
            ),
            ClientError::Decode(_) | ClientError::Url(_) => false,
        }
    }
}
