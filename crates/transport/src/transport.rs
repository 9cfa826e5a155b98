//! The transport contract: a connection that can `send` a pre-framed
//! [`Envelope`] and yield the ones it receives, plus `connect`/`listen`
//! to establish connections and `shutdown` to tear them all down.
//!
//! [`FramedSocketTransport`] is the reference implementation, carrying
//! [`EnvelopeCodec`] over plain TCP. An HTTP-based transport lives in
//! `trebuchet-http` and implements the same [`Connection`] contract over
//! request/response instead of a persistent socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use trebuchet_wire::{Envelope, EnvelopeCodec};

use crate::{Error, Result};

/// Bound on a connection's inbound envelope queue. A reader that falls
/// this far behind on draining its connection signals backpressure by
/// having its background pump task stall, rather than growing unbounded.
const INCOMING_QUEUE_CAPACITY: usize = 256;

/// One message received on a [`Connection`], alongside where it came
/// from and the connection to reply on.
pub struct IncomingMessage {
    /// The decoded envelope.
    pub envelope: Envelope,
    /// Endpoint (`host:port`) the message arrived from.
    pub source: String,
    /// The connection to send a response or further messages on.
    pub connection: Arc<dyn Connection>,
}

/// A bidirectional, message-oriented connection to a single peer.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one envelope, enforcing the transport's write timeout.
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Receive the next envelope, or `None` once the peer has closed
    /// the connection.
    async fn recv(&self) -> Option<Envelope>;

    /// The endpoint (`host:port`) this connection is to.
    fn endpoint(&self) -> &str;

    /// True once the connection's read side has observed EOF or an error.
    fn is_closed(&self) -> bool;

    /// Close the connection, dropping any buffered, undelivered reads.
    async fn close(&self);
}

/// Accepts inbound connections on a bound address.
#[async_trait]
pub trait Listener: Send {
    /// Block until the next peer connects, returning its [`Connection`]
    /// and the address it connected from.
    async fn accept(&mut self) -> Result<(Arc<dyn Connection>, String)>;
}

/// Establishes outbound connections and accepts inbound ones over the
/// framed socket transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to `endpoint` (`host:port`).
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Connection>>;

    /// Bind and return a [`Listener`] for inbound connections.
    async fn listen(&self, bind_addr: &str) -> Result<Box<dyn Listener>>;
}

/// Plain-TCP transport carrying [`EnvelopeCodec`]-framed messages.
#[derive(Debug, Clone, Default)]
pub struct FramedSocketTransport {
    max_frame_bytes: usize,
}

impl FramedSocketTransport {
    /// Build a transport whose frames are capped at `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    fn codec(&self) -> EnvelopeCodec {
        if self.max_frame_bytes == 0 {
            EnvelopeCodec::default()
        } else {
            EnvelopeCodec::new(self.max_frame_bytes)
        }
    }
}

#[async_trait]
impl Transport for FramedSocketTransport {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Connection>> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| Error::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        Ok(FramedConnection::spawn(
            endpoint.to_string(),
            Framed::new(stream, self.codec()),
        ))
    }

    async fn listen(&self, bind_addr: &str) -> Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Box::new(TcpFramedListener {
            listener,
            codec: self.codec(),
        }))
    }
}

struct TcpFramedListener {
    listener: TcpListener,
    codec: EnvelopeCodec,
}

#[async_trait]
impl Listener for TcpFramedListener {
    async fn accept(&mut self) -> Result<(Arc<dyn Connection>, String)> {
        let (stream, addr) = self.listener.accept().await?;
        let peer = addr.to_string();
        let connection = FramedConnection::spawn(peer.clone(), Framed::new(stream, self.codec.clone()));
        Ok((connection, peer))
    }
}

/// A [`Connection`] backed by a framed TCP socket, with a background
/// task pumping decoded envelopes into a bounded queue so `recv` never
/// blocks on the socket directly holding up a writer on the same value.
pub struct FramedConnection {
    endpoint: String,
    writer: Mutex<futures::stream::SplitSink<Framed<TcpStream, EnvelopeCodec>, Envelope>>,
    incoming: Mutex<mpsc::Receiver<Envelope>>,
    closed: Arc<AtomicBool>,
    write_timeout: std::time::Duration,
}

impl FramedConnection {
    fn spawn(endpoint: String, framed: Framed<TcpStream, EnvelopeCodec>) -> Arc<dyn Connection> {
        let (sink, mut stream) = framed.split();
        let (tx, rx) = mpsc::channel(INCOMING_QUEUE_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let closed_for_task = Arc::clone(&closed);
        let endpoint_for_task = endpoint.clone();

        tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint_for_task, error = %e, "connection read failed");
                        break;
                    }
                }
            }
            debug!(endpoint = %endpoint_for_task, "connection read side closed");
            closed_for_task.store(true, Ordering::SeqCst);
        });

        Arc::new(Self {
            endpoint,
            writer: Mutex::new(sink),
            incoming: Mutex::new(rx),
            closed,
            write_timeout: crate::config::PoolConfig::default().write_timeout,
        })
    }
}

#[async_trait]
impl Connection for FramedConnection {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        let mut writer = self.writer.lock().await;
        tokio::time::timeout(self.write_timeout, writer.send(envelope))
            .await
            .map_err(|_| Error::Timeout {
                endpoint: self.endpoint.clone(),
                after_ms: self.write_timeout.as_millis() as u64,
            })?
            .map_err(|e| Error::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })
    }

    async fn recv(&self) -> Option<Envelope> {
        self.incoming.lock().await.recv().await
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.incoming.lock().await.close();
    }
}
