use thiserror::Error;

/// Failures of a model provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429. `retry_after_ms` comes from the `retry-after` header.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The prompt no longer fits the model's context window.
    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("malformed stream: {0}")]
    Stream(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn is_context_length(&self) -> bool {
        matches!(self, ProviderError::ContextLengthExceeded(_))
    }
}
