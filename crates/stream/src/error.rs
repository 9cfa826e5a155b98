//! Errors from stream registration, dedup/resume bookkeeping, and the
//! server-side buffer.

use uuid::Uuid;

/// Errors this crate's operations can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No registered stream matches this id.
    #[error("unknown stream {0}")]
    UnknownStream(Uuid),

    /// A resume was requested for a stream whose buffer has already
    /// evicted the requested sequence number.
    #[error("stream {stream_id} cannot resume from sequence {requested}: oldest retained is {oldest}")]
    ResumeBufferMiss {
        /// Stream that couldn't be resumed.
        stream_id: Uuid,
        /// Sequence number the client asked to resume from.
        requested: u64,
        /// Oldest sequence number still held in the buffer.
        oldest: u64,
    },

    /// A stream was already registered under this id.
    #[error("stream {0} already registered")]
    AlreadyRegistered(Uuid),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
