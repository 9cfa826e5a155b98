//! The dispatch surface a local actor implementation exposes to the
//! [`crate::system::ActorSystem`].
//!
//! Generating this trait's implementation from a higher-level actor
//! definition (matching method names and argument types to wire bytes)
//! is a codegen concern outside this crate; `ActorHandler` is the stable
//! boundary such a generator — or a handwritten actor — targets.

use async_trait::async_trait;
use futures::stream::BoxStream;

use trebuchet_wire::Base64Bytes;

/// Result of a unary (non-streaming) dispatch.
pub type DispatchResult = Result<Base64Bytes, String>;

/// A stream of opaque, pre-encoded values produced by a streaming target.
/// Each item is already in the actor's chosen wire encoding (full value or
/// delta), matching what `trebuchet-stream` expects to forward as-is.
pub type StreamDispatchResult = BoxStream<'static, Base64Bytes>;

/// Implemented by every locally-hosted actor to accept dispatched calls.
///
/// A handler is registered under a single name in the
/// [`crate::system::ActorSystem`]'s local actor table and must serialize
/// its own state internally if it needs single-writer semantics; the
/// system does not serialize calls to a handler on the caller's behalf.
#[async_trait]
pub trait ActorHandler: Send + Sync {
    /// Invoke a non-streaming (not `observe`-prefixed) method by name.
    ///
    /// `generic_substitutions` carries the per-argument type names the
    /// caller declared, in order; a handler with no generic methods can
    /// ignore it.
    async fn dispatch(
        &self,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
    ) -> DispatchResult;

    /// Invoke an `observe`-prefixed streaming method by name, returning
    /// the resulting sequence of pre-encoded values.
    async fn dispatch_stream(
        &self,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
    ) -> Result<StreamDispatchResult, String>;

    /// Called once when the actor is removed from the system, e.g. on
    /// host drain. Handlers with no background work can no-op.
    async fn shutdown(&self) {}
}
