//! Errors surfaced by the server host's accept loop and lifecycle.

/// Errors produced by [`crate::ServerHost`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A new invocation arrived while the host was draining or stopped.
    #[error("server draining")]
    Draining,

    /// The transport failed to bind or accept.
    #[error(transparent)]
    Transport(#[from] trebuchet_transport::Error),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
