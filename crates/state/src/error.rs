//! Errors produced by a [`crate::StateStore`].

/// Errors produced by [`crate::StateStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `saveIfVersion` observed a version other than the one expected.
    #[error("version conflict on save: expected {expected}, actual {actual}")]
    VersionConflict {
        /// Version the caller believed was current.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// `updateWithRetry` exhausted its retry budget without a clean save.
    #[error("gave up after {attempts} attempt(s): {last_conflict}")]
    MaxRetriesExceeded {
        /// Number of `load -> transform -> saveIfVersion` attempts made.
        attempts: u32,
        /// The conflict that ended the last attempt.
        last_conflict: Box<Error>,
    },

    /// The transform passed to `updateWithRetry` itself failed.
    #[error("update transform failed: {0}")]
    TransformFailed(String),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
