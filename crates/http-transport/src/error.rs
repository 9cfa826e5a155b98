//! Errors surfaced by the HTTP gateway server and its matching client.

/// Errors produced by [`crate::server`] and [`crate::client`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request body did not decode into the expected shape.
    #[error("malformed request body: {0}")]
    BadRequest(String),

    /// Dispatch into the actor system failed.
    #[error(transparent)]
    Actor(#[from] trebuchet_actor::Error),

    /// JSON encode/decode failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The underlying HTTP client failed to send or receive.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A peer answered with a non-2xx status the client does not retry.
    #[error("peer at {endpoint} answered {status}: {body}")]
    UpstreamStatus {
        /// URL that was called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated for readability.
        body: String,
    },

    /// Every retry attempt against a peer was exhausted.
    #[error("exhausted {attempts} attempt(s) calling {endpoint}: {last_error}")]
    RetriesExhausted {
        /// URL that was called.
        endpoint: String,
        /// Number of attempts made.
        attempts: u32,
        /// Display of the last failure.
        last_error: String,
    },
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
