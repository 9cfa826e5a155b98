//! The two shapes a reference to an actor can take: a [`LocalReference`]
//! that dispatches straight into an in-process [`ActorHandler`], and a
//! [`RemoteProxy`] that routes through [`ActorSystem`] to a peer over
//! the network. Callers interact with either through the same
//! [`ActorRef`] trait and don't need to know which one they hold.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use trebuchet_wire::{ActorId, Base64Bytes, StreamEndReason, StreamFilter};
use trebuchet_stream::StreamEvent;

use crate::error::{Error, Result};
use crate::handler::ActorHandler;
use crate::system::ActorSystem;

/// A capability set over one actor: call its unary methods, or observe
/// one of its streamed properties.
#[async_trait]
pub trait ActorRef: Send + Sync {
    /// Invoke a non-streaming method and await its result.
    async fn call(
        &self,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
    ) -> Result<Base64Bytes>;

    /// Open a streaming method and return the resulting sequence.
    async fn observe(
        &self,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
        filter: Option<StreamFilter>,
    ) -> Result<BoxStream<'static, StreamEvent>>;

    /// Identity of the actor this reference targets.
    fn actor_id(&self) -> &ActorId;
}

/// A reference to an actor hosted in this process: calls go straight to
/// the handler, with no envelope round trip.
pub struct LocalReference {
    actor_id: ActorId,
    handler: Arc<dyn ActorHandler>,
}

impl LocalReference {
    /// Build a reference to a locally-hosted actor.
    pub fn new(actor_id: ActorId, handler: Arc<dyn ActorHandler>) -> Self {
        Self { actor_id, handler }
    }
}

#[async_trait]
impl ActorRef for LocalReference {
    async fn call(
        &self,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
    ) -> Result<Base64Bytes> {
        self.handler
            .dispatch(target_identifier, generic_substitutions, arguments)
            .await
            .map_err(Error::HandlerFailed)
    }

    async fn observe(
        &self,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
        _filter: Option<StreamFilter>,
    ) -> Result<BoxStream<'static, StreamEvent>> {
        let inner = self
            .handler
            .dispatch_stream(target_identifier, generic_substitutions, arguments)
            .await
            .map_err(Error::HandlerFailed)?;

        let data = inner.map(StreamEvent::Data);
        let end = futures::stream::once(async {
            StreamEvent::Ended {
                reason: StreamEndReason::Completed,
                message: None,
            }
        });
        Ok(Box::pin(data.chain(end)))
    }

    fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }
}

/// A reference to an actor hosted on another node: every call is
/// encoded as an `Invocation` and routed through the owning
/// [`ActorSystem`]'s transport.
pub struct RemoteProxy {
    actor_id: ActorId,
    system: Arc<ActorSystem>,
}

impl RemoteProxy {
    /// Build a proxy that routes calls through `system` to `actor_id`'s
    /// node.
    pub fn new(actor_id: ActorId, system: Arc<ActorSystem>) -> Self {
        Self { actor_id, system }
    }
}

#[async_trait]
impl ActorRef for RemoteProxy {
    async fn call(
        &self,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
    ) -> Result<Base64Bytes> {
        self.system
            .invoke_remote(&self.actor_id, target_identifier, generic_substitutions, arguments)
            .await
    }

    async fn observe(
        &self,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
        filter: Option<StreamFilter>,
    ) -> Result<BoxStream<'static, StreamEvent>> {
        self.system
            .invoke_remote_stream(&self.actor_id, target_identifier, generic_substitutions, arguments, filter)
            .await
    }

    fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }
}
