//! Error types for envelope encoding/decoding and framing.

use thiserror::Error;

/// Result type alias for wire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the wire layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Envelope failed to decode from its wire representation.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A length-prefixed frame exceeded the configured maximum size.
    #[error("frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Size of the oversized frame, in bytes.
        size: usize,
        /// Configured maximum frame size, in bytes.
        max: usize,
    },

    /// The underlying byte stream was closed before a full frame arrived.
    #[error("connection closed mid-frame")]
    UnexpectedEof,

    /// I/O error reading or writing frames.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
