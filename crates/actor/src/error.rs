//! Errors surfaced by actor resolution, invocation dispatch, and
//! streamed-property bookkeeping.

use trebuchet_wire::ActorId;
use uuid::Uuid;

/// Errors produced by [`crate::system::ActorSystem`] and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No local handler is registered under this name.
    #[error("actor not found: {0}")]
    ActorNotFound(String),

    /// The target of an `Invocation` does not match this node's endpoint
    /// and no remote proxy could route it.
    #[error("actor {0} is not local and no route to its host is configured")]
    NotLocal(ActorId),

    /// A handler has no method by this name.
    #[error("unknown target `{target}` on actor `{actor}`")]
    UnknownTarget {
        /// Actor the call was routed to.
        actor: String,
        /// Requested method name.
        target: String,
    },

    /// A unary call was dispatched at a streaming (`observe`-prefixed) target.
    #[error("target `{0}` is streaming; use dispatch_stream")]
    NotStreaming(String),

    /// A streaming call was dispatched at a non-streaming target.
    #[error("target `{0}` is not streaming; use dispatch")]
    NotUnary(String),

    /// A `Response`/`StreamStart` arrived for a `call_id` with no
    /// outstanding caller, or the caller already dropped its receiver.
    #[error("no outstanding call for call_id {0}")]
    UnknownCallId(Uuid),

    /// The handler itself failed.
    #[error("actor method failed: {0}")]
    HandlerFailed(String),

    /// The underlying transport failed to send or receive.
    #[error(transparent)]
    Transport(#[from] trebuchet_transport::Error),

    /// Wire encode/decode failure.
    #[error(transparent)]
    Wire(#[from] trebuchet_wire::Error),

    /// Protocol negotiation failed between this node and a peer.
    #[error("no overlapping protocol version between client {0:?} and server {1:?}")]
    ProtocolNegotiationFailed((u32, u32), (u32, u32)),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
