//! The send fabric: how a downstream connection is actually reached on
//! whatever server-push primitive the hosting platform offers.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use trebuchet_wire::Envelope;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Delivers one envelope to a named downstream connection.
#[async_trait]
pub trait SendFabric: Send + Sync {
    /// Deliver `envelope` to `to`.
    async fn send(&self, to: Uuid, envelope: Envelope) -> Result<()>;

    /// True iff `to` is still considered reachable.
    async fn is_alive(&self, to: Uuid) -> bool;
}

/// A [`SendFabric`] backed by in-process channels, one per connection —
/// the shape a framed-socket or SSE host wires up: each accepted
/// connection registers its outbound sender here, and anything that
/// needs to push to it (the change-feed bridge, a direct stream
/// publish) goes through this fabric instead of holding the channel
/// itself.
#[derive(Default)]
pub struct ChannelSendFabric {
    channels: DashMap<Uuid, mpsc::Sender<Envelope>>,
}

impl ChannelSendFabric {
    /// Build an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbound channel for a connection.
    pub fn attach(&self, connection_id: Uuid, sender: mpsc::Sender<Envelope>) {
        self.channels.insert(connection_id, sender);
    }

    /// Remove a connection's outbound channel.
    pub fn detach(&self, connection_id: Uuid) {
        self.channels.remove(&connection_id);
    }
}

#[async_trait]
impl SendFabric for ChannelSendFabric {
    async fn send(&self, to: Uuid, envelope: Envelope) -> Result<()> {
        let Some(sender) = self.channels.get(&to).map(|s| s.clone()) else {
            return Err(Error::ConnectionClosed(to));
        };
        sender.send(envelope).await.map_err(|_| Error::ConnectionClosed(to))
    }

    async fn is_alive(&self, to: Uuid) -> bool {
        self.channels.get(&to).map(|s| !s.is_closed()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trebuchet_wire::StreamEndReason;

    fn sample_envelope() -> Envelope {
        Envelope::StreamEnd {
            stream_id: Uuid::new_v4(),
            reason: StreamEndReason::Completed,
            message: None,
        }
    }

    #[tokio::test]
    async fn send_to_an_unattached_connection_is_closed() {
        let fabric = ChannelSendFabric::new();
        let result = fabric.send(Uuid::new_v4(), sample_envelope()).await;
        assert!(matches!(result, Err(Error::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn send_delivers_to_the_attached_channel() {
        let fabric = ChannelSendFabric::new();
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Uuid::new_v4();
        fabric.attach(conn, tx);

        fabric.send(conn, sample_envelope()).await.unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn is_alive_reflects_detachment() {
        let fabric = ChannelSendFabric::new();
        let (tx, _rx) = mpsc::channel(4);
        let conn = Uuid::new_v4();
        fabric.attach(conn, tx);
        assert!(fabric.is_alive(conn).await);
        fabric.detach(conn);
        assert!(!fabric.is_alive(conn).await);
    }
}
