//! Errors surfaced while assembling or configuring the gateway pipeline.
//!
//! Per-request rejections (a bad token, a denied role, a throttled peer)
//! are not modeled as this error type: the middleware stages answer
//! those directly with an HTTP response, since by definition they never
//! reach a caller capable of handling a typed `Result`.

/// Errors produced while building a [`crate::GatewayState`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A signing/verification key was malformed for its algorithm.
    #[error("invalid {algorithm:?} key material: {reason}")]
    InvalidKey {
        /// The JWT algorithm the key was supplied for.
        algorithm: jsonwebtoken::Algorithm,
        /// Why the key was rejected.
        reason: String,
    },
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
