//! Errors produced by the connection registry and send fabric.

use uuid::Uuid;

/// Errors produced by [`crate::ConnectionRegistry`] and [`crate::SendFabric`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No record exists for this connection id.
    #[error("no connection record for {0}")]
    UnknownConnection(Uuid),

    /// The downstream connection is permanently gone; the caller should
    /// remove its record rather than retry.
    #[error("connection {0} is closed")]
    ConnectionClosed(Uuid),

    /// The send failed for a reason that may clear on its own; the
    /// record should be kept and the send retried or skipped for this
    /// round.
    #[error("transient send failure to {to}: {reason}")]
    Transient {
        /// Connection the send was addressed to.
        to: Uuid,
        /// Description of the failure.
        reason: String,
    },
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
