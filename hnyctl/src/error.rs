use thiserror::Error;

/// Result type for hnyctl operations.
pub type Result<T> = std::result::Result<T, HnyError>;

/// Errors that can occur when driving the Honeycomb API.
#[derive(Debug, Error)]
pub enum HnyError {
    /// The API returned a non-2xx status that was not retryable, or retries
    /// were exhausted. Carries the response body verbatim.
    #[error("API error: status {status}: {body}")]
    Api { status: u16, body: String },

    /// An asynchronous query or dependency request reported a server-side
    /// failure. The payload is surfaced as-is and is never retried here.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// An asynchronous request did not reach a terminal state in time.
    #[error("Timed out after {max_wait_secs}s waiting for {what}")]
    Timeout { what: String, max_wait_secs: u64 },

    /// A response body did not have the expected shape.
    #[error("Unexpected response shape: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration or arguments
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Network-level request failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Dependency store operation failed
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Filesystem error (service lists, snapshot files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HnyError {
    /// True when the error is the propagated form of an HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HnyError::Api { status: 404, .. })
    }
}
