//! The actor system: the local actor table, outstanding-call
//! correlation, and the envelope demux that turns inbound messages into
//! handler dispatches, resolved calls, or stream events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};
use uuid::Uuid;

use trebuchet_stream::{ClientStreamRegistry, InMemoryCheckpointStore, ServerStreamRegistry, StreamBufferConfig, StreamEvent};
use trebuchet_transport::{Connection, ConnectionPool, PoolConfig, Transport};
use trebuchet_wire::{
    negotiate_protocol_version, ActorId, Base64Bytes, Envelope, StreamEndReason, StreamFilter,
};

use crate::error::{Error, Result};
use crate::handler::ActorHandler;
use crate::proxy::{ActorRef, LocalReference, RemoteProxy};

/// How long a unary call waits for its `Response` before failing with
/// [`Error::UnknownCallId`]-adjacent timeout behavior.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire protocol version range this node supports, as `(min, max)`.
pub type ProtocolRange = (u32, u32);

enum PendingCall {
    Unary(oneshot::Sender<Envelope>),
    StreamStart(oneshot::Sender<Envelope>),
}

/// Owns every locally-hosted actor and the bookkeeping needed to route
/// calls to remote ones: outstanding call correlation, connection
/// pooling, and the client/server stream registries.
pub struct ActorSystem {
    self_host: String,
    self_port: u16,
    protocol_range: ProtocolRange,
    local_actors: DashMap<String, Arc<dyn ActorHandler>>,
    outstanding_calls: DashMap<Uuid, PendingCall>,
    transport: Arc<dyn Transport>,
    pool: ConnectionPool,
    pumped_endpoints: DashMap<String, ()>,
    client_streams: Arc<ClientStreamRegistry>,
    server_streams: Arc<ServerStreamRegistry>,
    next_call_timeout: AtomicU64,
}

impl ActorSystem {
    /// Build a system bound to `self_host:self_port`, using `transport`
    /// for outbound connections.
    pub fn new(
        self_host: impl Into<String>,
        self_port: u16,
        protocol_range: ProtocolRange,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_host: self_host.into(),
            self_port,
            protocol_range,
            local_actors: DashMap::new(),
            outstanding_calls: DashMap::new(),
            pool: ConnectionPool::new(Arc::clone(&transport), PoolConfig::default()),
            transport,
            pumped_endpoints: DashMap::new(),
            client_streams: Arc::new(ClientStreamRegistry::new(Arc::new(
                InMemoryCheckpointStore::default(),
            ))),
            server_streams: Arc::new(ServerStreamRegistry::new(StreamBufferConfig::default())),
            next_call_timeout: AtomicU64::new(DEFAULT_CALL_TIMEOUT.as_millis() as u64),
        })
    }

    /// Override the default unary call timeout.
    pub fn set_call_timeout(&self, timeout: Duration) {
        self.next_call_timeout
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.next_call_timeout.load(Ordering::Relaxed))
    }

    /// This node's listening endpoint.
    pub fn endpoint(&self) -> (&str, u16) {
        (&self.self_host, self.self_port)
    }

    /// Register `handler` under `id`, returning the fully-qualified
    /// [`ActorId`] other nodes can reach it at.
    pub fn expose(&self, id: impl Into<String>, handler: Arc<dyn ActorHandler>) -> ActorId {
        let id = id.into();
        self.local_actors.insert(id.clone(), handler);
        ActorId::new(id, self.self_host.clone(), self.self_port)
    }

    /// Unregister a previously-exposed actor, invoking its
    /// [`ActorHandler::shutdown`].
    pub async fn unexpose(&self, id: &str) {
        if let Some((_, handler)) = self.local_actors.remove(id) {
            handler.shutdown().await;
        }
    }

    /// Resolve an [`ActorId`] to a callable reference: local if it names
    /// an actor on this node, otherwise a proxy that routes remotely.
    pub fn resolve(self: &Arc<Self>, actor_id: ActorId) -> Result<Box<dyn ActorRef>> {
        if actor_id.is_local(&self.self_host, self.self_port) {
            let handler = self
                .local_actors
                .get(&actor_id.id)
                .ok_or_else(|| Error::ActorNotFound(actor_id.id.clone()))?
                .clone();
            Ok(Box::new(LocalReference::new(actor_id, handler)))
        } else {
            Ok(Box::new(RemoteProxy::new(actor_id, Arc::clone(self))))
        }
    }

    fn endpoint_of(actor_id: &ActorId) -> String {
        format!("{}:{}", actor_id.host, actor_id.port)
    }

    async fn connection_for(self: &Arc<Self>, actor_id: &ActorId) -> Result<Arc<dyn Connection>> {
        let endpoint = Self::endpoint_of(actor_id);
        let connection = self.pool.get(&endpoint).await?;
        if self.pumped_endpoints.insert(endpoint.clone(), ()).is_none() {
            let system = Arc::clone(self);
            let connection_for_pump = Arc::clone(&connection);
            tokio::spawn(async move {
                system.pump(connection_for_pump).await;
            });
        }
        Ok(connection)
    }

    /// Call a unary method on a remote actor and await its `Response`.
    pub async fn invoke_remote(
        self: &Arc<Self>,
        actor_id: &ActorId,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
    ) -> Result<Base64Bytes> {
        let connection = self.connection_for(actor_id).await?;
        let call_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.outstanding_calls.insert(call_id, PendingCall::Unary(tx));

        if let Err(e) = connection
            .send(Envelope::Invocation {
                call_id,
                actor_id: actor_id.clone(),
                target_identifier: target_identifier.to_string(),
                generic_substitutions: generic_substitutions.to_vec(),
                arguments: arguments.to_vec(),
                protocol_version: Some(self.protocol_range.1),
                stream_filter: None,
                trace_context: None,
            })
            .await
        {
            self.outstanding_calls.remove(&call_id);
            return Err(e.into());
        }

        let response = tokio::time::timeout(self.call_timeout(), rx).await.map_err(|_| {
            self.outstanding_calls.remove(&call_id);
            Error::UnknownCallId(call_id)
        })?;
        let response = response.map_err(|_| Error::UnknownCallId(call_id))?;

        match response {
            Envelope::Response { result, error_message, .. } => match (result, error_message) {
                (_, Some(message)) => Err(Error::HandlerFailed(message)),
                (Some(bytes), None) => Ok(bytes),
                (None, None) => Ok(Base64Bytes::default()),
            },
            other => {
                warn!(?call_id, "expected Response, got a different envelope");
                Err(Error::HandlerFailed(format!(
                    "unexpected reply envelope for call {call_id}: {other:?}"
                )))
            }
        }
    }

    /// Open a streaming method on a remote actor and return the
    /// resulting deduplicated sequence of [`StreamEvent`]s.
    pub async fn invoke_remote_stream(
        self: &Arc<Self>,
        actor_id: &ActorId,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
        stream_filter: Option<StreamFilter>,
    ) -> Result<BoxStream<'static, StreamEvent>> {
        let connection = self.connection_for(actor_id).await?;
        let call_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.outstanding_calls.insert(call_id, PendingCall::StreamStart(tx));

        if let Err(e) = connection
            .send(Envelope::Invocation {
                call_id,
                actor_id: actor_id.clone(),
                target_identifier: target_identifier.to_string(),
                generic_substitutions: generic_substitutions.to_vec(),
                arguments: arguments.to_vec(),
                protocol_version: Some(self.protocol_range.1),
                stream_filter,
                trace_context: None,
            })
            .await
        {
            self.outstanding_calls.remove(&call_id);
            return Err(e.into());
        }

        let started = tokio::time::timeout(self.call_timeout(), rx).await.map_err(|_| {
            self.outstanding_calls.remove(&call_id);
            Error::UnknownCallId(call_id)
        })?;
        let started = started.map_err(|_| Error::UnknownCallId(call_id))?;

        let Envelope::StreamStart { stream_id, .. } = started else {
            return Err(Error::HandlerFailed(format!(
                "expected StreamStart for call {call_id}, got something else"
            )));
        };

        let receiver = self
            .client_streams
            .create_remote_stream(stream_id, actor_id.clone(), target_identifier.to_string())
            .map_err(|e| Error::HandlerFailed(e.to_string()))?;

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    /// Background task draining one connection's incoming envelopes
    /// into [`ActorSystem::receive`] until it closes.
    async fn pump(self: Arc<Self>, connection: Arc<dyn Connection>) {
        let source = connection.endpoint().to_string();
        while let Some(envelope) = connection.recv().await {
            if let Err(e) = self.receive(envelope, &source, Arc::clone(&connection)).await {
                warn!(error = %e, source = %source, "error handling inbound envelope");
            }
        }
        debug!(source = %source, "connection pump exiting");
    }

    /// Demultiplex one inbound envelope: dispatch an `Invocation` to a
    /// local handler, resolve an outstanding call with a `Response` or
    /// `StreamStart`, or forward a stream event to the client registry.
    pub async fn receive(
        self: &Arc<Self>,
        envelope: Envelope,
        source: &str,
        connection: Arc<dyn Connection>,
    ) -> Result<()> {
        match envelope {
            Envelope::Invocation {
                call_id,
                actor_id,
                target_identifier,
                generic_substitutions,
                arguments,
                stream_filter,
                ..
            } => {
                self.handle_invocation(
                    call_id,
                    actor_id,
                    target_identifier,
                    generic_substitutions,
                    arguments,
                    stream_filter,
                    connection,
                )
                .await
            }
            Envelope::Response { call_id, result, error_message } => {
                self.resolve_outstanding(
                    call_id,
                    Envelope::Response { call_id, result, error_message },
                );
                Ok(())
            }
            Envelope::StreamStart { call_id, stream_id, actor_id, target_identifier } => {
                self.resolve_outstanding(
                    call_id,
                    Envelope::StreamStart { call_id, stream_id, actor_id, target_identifier },
                );
                Ok(())
            }
            Envelope::StreamData { stream_id, sequence_number, data, .. } => {
                self.client_streams.handle_stream_data(stream_id, sequence_number, data).await;
                Ok(())
            }
            Envelope::StreamError { stream_id, error_message } => {
                self.client_streams.handle_stream_error(stream_id, error_message).await;
                Ok(())
            }
            Envelope::StreamEnd { stream_id, reason, message } => {
                self.client_streams.handle_stream_end(stream_id, reason, message).await;
                Ok(())
            }
            Envelope::StreamResume { stream_id, last_sequence, actor_id, target_identifier } => {
                self.handle_stream_resume(stream_id, last_sequence, actor_id, target_identifier, connection)
                    .await
            }
        }
        .map_err(|e| {
            warn!(%source, error = %e, "failed to handle inbound envelope");
            e
        })
    }

    fn resolve_outstanding(&self, call_id: Uuid, envelope: Envelope) {
        if let Some((_, pending)) = self.outstanding_calls.remove(&call_id) {
            let sender = match pending {
                PendingCall::Unary(tx) => tx,
                PendingCall::StreamStart(tx) => tx,
            };
            let _ = sender.send(envelope);
        } else {
            debug!(%call_id, "reply for call with no outstanding caller, dropping");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_invocation(
        self: &Arc<Self>,
        call_id: Uuid,
        actor_id: ActorId,
        target_identifier: String,
        generic_substitutions: Vec<String>,
        arguments: Vec<Base64Bytes>,
        stream_filter: Option<StreamFilter>,
        connection: Arc<dyn Connection>,
    ) -> Result<()> {
        if !actor_id.is_local(&self.self_host, self.self_port) {
            connection
                .send(Envelope::Response {
                    call_id,
                    result: None,
                    error_message: Some(format!("actor {actor_id} is not hosted here")),
                })
                .await?;
            return Ok(());
        }

        let Some(handler) = self.local_actors.get(&actor_id.id).map(|h| h.clone()) else {
            connection
                .send(Envelope::Response {
                    call_id,
                    result: None,
                    error_message: Some(format!("actor not found: {}", actor_id.id)),
                })
                .await?;
            return Ok(());
        };

        if Envelope::is_streaming_target(&target_identifier) {
            self.handle_streaming_invocation(
                call_id,
                actor_id,
                target_identifier,
                generic_substitutions,
                arguments,
                stream_filter,
                handler,
                connection,
            )
            .await
        } else {
            let result = handler
                .dispatch(&target_identifier, &generic_substitutions, &arguments)
                .await;
            let response = match result {
                Ok(bytes) => Envelope::Response {
                    call_id,
                    result: Some(bytes),
                    error_message: None,
                },
                Err(message) => Envelope::Response {
                    call_id,
                    result: None,
                    error_message: Some(message),
                },
            };
            connection.send(response).await?;
            Ok(())
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_streaming_invocation(
        self: &Arc<Self>,
        call_id: Uuid,
        actor_id: ActorId,
        target_identifier: String,
        generic_substitutions: Vec<String>,
        arguments: Vec<Base64Bytes>,
        stream_filter: Option<StreamFilter>,
        handler: Arc<dyn ActorHandler>,
        connection: Arc<dyn Connection>,
    ) -> Result<()> {
        let stream_id = Uuid::new_v4();
        self.server_streams
            .open(stream_id, actor_id.clone(), target_identifier.clone(), stream_filter);

        connection
            .send(Envelope::StreamStart {
                call_id,
                stream_id,
                actor_id: actor_id.clone(),
                target_identifier: target_identifier.clone(),
            })
            .await?;

        let values = match handler
            .dispatch_stream(&target_identifier, &generic_substitutions, &arguments)
            .await
        {
            Ok(values) => values,
            Err(message) => {
                connection
                    .send(Envelope::StreamError {
                        stream_id,
                        error_message: message.clone(),
                    })
                    .await?;
                connection
                    .send(Envelope::StreamEnd {
                        stream_id,
                        reason: StreamEndReason::Error,
                        message: Some(message),
                    })
                    .await?;
                self.server_streams.close(stream_id);
                return Ok(());
            }
        };

        self.spawn_stream_pump(stream_id, values, connection);

        Ok(())
    }

    /// Drain `values` into `StreamData` publishes on `stream_id`,
    /// finishing with a `StreamEnd` once the handler's sequence ends or a
    /// send fails.
    fn spawn_stream_pump(
        self: &Arc<Self>,
        stream_id: Uuid,
        mut values: futures::stream::BoxStream<'static, Base64Bytes>,
        connection: Arc<dyn Connection>,
    ) {
        let system = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(value) = values.next().await {
                match system.server_streams.publish(stream_id, value) {
                    Ok(Some(data_envelope)) => {
                        if connection.send(data_envelope).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        error!(%stream_id, error = %e, "failed publishing to stream buffer");
                        break;
                    }
                }
            }
            let _ = connection
                .send(Envelope::StreamEnd {
                    stream_id,
                    reason: StreamEndReason::Completed,
                    message: None,
                })
                .await;
            system.server_streams.close(stream_id);
        });
    }

    async fn handle_stream_resume(
        self: &Arc<Self>,
        stream_id: Uuid,
        last_sequence: u64,
        actor_id: ActorId,
        target_identifier: String,
        connection: Arc<dyn Connection>,
    ) -> Result<()> {
        match self.server_streams.resume(stream_id, last_sequence) {
            Ok(replay) => {
                for envelope in replay {
                    connection.send(envelope).await?;
                }
                Ok(())
            }
            Err(trebuchet_stream::Error::UnknownStream(_)) => {
                connection
                    .send(Envelope::StreamError {
                        stream_id,
                        error_message: format!(
                            "no buffer for stream {stream_id} on {actor_id}/{target_identifier}; resubscribe"
                        ),
                    })
                    .await?;
                connection
                    .send(Envelope::StreamEnd {
                        stream_id,
                        reason: StreamEndReason::Error,
                        message: Some("stream unknown; resubscribe".to_string()),
                    })
                    .await?;
                Ok(())
            }
            Err(trebuchet_stream::Error::ResumeBufferMiss { .. }) => {
                self.restart_expired_stream(stream_id, actor_id, target_identifier, connection)
                    .await
            }
            Err(e) => Err(Error::HandlerFailed(e.to_string())),
        }
    }

    /// Re-open a stream whose buffer has aged past the client's
    /// checkpoint: reissues a fresh `StreamStart` under the same
    /// `stream_id`, then republishes the handler's current state as the
    /// first value of a new sequence, rather than terminating the stream.
    async fn restart_expired_stream(
        self: &Arc<Self>,
        stream_id: Uuid,
        actor_id: ActorId,
        target_identifier: String,
        connection: Arc<dyn Connection>,
    ) -> Result<()> {
        let Some(handler) = self.local_actors.get(&actor_id.id).map(|h| h.clone()) else {
            connection
                .send(Envelope::StreamError {
                    stream_id,
                    error_message: format!("actor not found: {}", actor_id.id),
                })
                .await?;
            connection
                .send(Envelope::StreamEnd {
                    stream_id,
                    reason: StreamEndReason::Error,
                    message: Some("actor not found".to_string()),
                })
                .await?;
            return Ok(());
        };

        self.server_streams.close(stream_id);
        self.server_streams
            .open(stream_id, actor_id.clone(), target_identifier.clone(), None);

        connection
            .send(Envelope::StreamStart {
                call_id: Uuid::new_v4(),
                stream_id,
                actor_id: actor_id.clone(),
                target_identifier: target_identifier.clone(),
            })
            .await?;

        let values = match handler.dispatch_stream(&target_identifier, &[], &[]).await {
            Ok(values) => values,
            Err(message) => {
                connection
                    .send(Envelope::StreamError {
                        stream_id,
                        error_message: message.clone(),
                    })
                    .await?;
                connection
                    .send(Envelope::StreamEnd {
                        stream_id,
                        reason: StreamEndReason::Error,
                        message: Some(message),
                    })
                    .await?;
                self.server_streams.close(stream_id);
                return Ok(());
            }
        };

        self.spawn_stream_pump(stream_id, values, connection);
        Ok(())
    }

    /// Negotiate a protocol version against a peer advertising
    /// `peer_range`, failing if the ranges don't overlap.
    pub fn negotiate_with(&self, peer_range: ProtocolRange) -> Result<u32> {
        negotiate_protocol_version(self.protocol_range, peer_range)
            .ok_or(Error::ProtocolNegotiationFailed(self.protocol_range, peer_range))
    }

    /// Number of actors currently exposed on this node.
    pub fn local_actor_count(&self) -> usize {
        self.local_actors.len()
    }

    /// Number of server-side streams currently open on this node, for
    /// health reporting.
    pub fn active_stream_count(&self) -> usize {
        self.server_streams.len()
    }
}
