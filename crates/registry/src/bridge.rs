//! Bridges a [`trebuchet_state::StateStore`] change feed into
//! [`Envelope::StreamData`] pushes against every connection subscribed
//! to the mutated actor.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use trebuchet_wire::{Base64Bytes, Envelope};

use crate::registry::ConnectionRegistry;
use crate::sender::SendFabric;
use crate::Error;

/// Drives one [`trebuchet_state::ChangeEvent`] receiver, fanning each
/// event out to every connection subscribed to its actor.
///
/// Broadcasting to N subscribers is concurrent but isolated: one
/// connection's send failure does not block or fail delivery to the
/// others.
pub struct ChangeFeedBridge {
    registry: Arc<ConnectionRegistry>,
    fabric: Arc<dyn SendFabric>,
}

impl ChangeFeedBridge {
    /// Build a bridge over the given registry and send fabric.
    pub fn new(registry: Arc<ConnectionRegistry>, fabric: Arc<dyn SendFabric>) -> Self {
        Self { registry, fabric }
    }

    /// Run the bridge against `changes` until the channel closes.
    ///
    /// Intended to be spawned as a background task; returns only when
    /// the upstream change feed ends (the store was dropped) or lags
    /// the receiver past recovery.
    pub async fn run(self, mut changes: broadcast::Receiver<trebuchet_state::ChangeEvent>) {
        loop {
            match changes.recv().await {
                Ok(event) => self.dispatch(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change-feed bridge lagged; some mutations were not broadcast");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Spawn [`Self::run`] as a background task.
    pub fn spawn(self, changes: broadcast::Receiver<trebuchet_state::ChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(changes))
    }

    async fn dispatch(&self, event: trebuchet_state::ChangeEvent) {
        let records = self.registry.get_by_actor(&event.actor_id);
        if records.is_empty() {
            return;
        }

        let sends = records.into_iter().map(|record| {
            let fabric = Arc::clone(&self.fabric);
            let registry = Arc::clone(&self.registry);
            let envelope = Envelope::StreamData {
                stream_id: record.stream_id,
                sequence_number: event.sequence_number,
                data: Base64Bytes::new(event.new_value.clone()),
                timestamp: Utc::now(),
            };
            async move {
                match fabric.send(record.connection_id, envelope).await {
                    Ok(()) => {
                        let _ = registry.update_sequence(record.connection_id, event.sequence_number);
                    }
                    Err(Error::ConnectionClosed(_)) => {
                        debug!(connection_id = %record.connection_id, "dropping closed connection from registry");
                        registry.unregister(record.connection_id);
                    }
                    Err(err) => {
                        warn!(connection_id = %record.connection_id, error = %err, "change-feed push failed");
                    }
                }
            }
        });

        futures::future::join_all(sends).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use trebuchet_state::{ChangeEvent, StateStore};
    use uuid::Uuid;

    use super::*;
    use crate::sender::ChannelSendFabric;

    fn actor(id: &str) -> trebuchet_wire::ActorId {
        trebuchet_wire::ActorId::new(id, "127.0.0.1", 9000)
    }

    #[tokio::test]
    async fn a_mutation_is_pushed_to_every_subscriber_of_that_actor() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fabric = Arc::new(ChannelSendFabric::new());

        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        fabric.attach(conn_a, tx_a);
        fabric.attach(conn_b, tx_b);
        registry.register(conn_a, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(300));
        registry.register(conn_b, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(300));

        let bridge = ChangeFeedBridge::new(Arc::clone(&registry), fabric);
        bridge
            .dispatch(ChangeEvent {
                actor_id: "counter-1".to_string(),
                new_value: b"42".to_vec(),
                sequence_number: 1,
            })
            .await;

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn a_closed_connection_is_dropped_from_the_registry_without_affecting_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fabric = Arc::new(ChannelSendFabric::new());

        let dead = Uuid::new_v4();
        let live = Uuid::new_v4();
        let (tx_live, mut rx_live) = mpsc::channel(4);
        fabric.attach(live, tx_live);
        // `dead` is registered but never attached to the fabric, so any
        // send to it resolves as `ConnectionClosed`.
        registry.register(dead, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(300));
        registry.register(live, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(300));

        let bridge = ChangeFeedBridge::new(Arc::clone(&registry), fabric);
        bridge
            .dispatch(ChangeEvent {
                actor_id: "counter-1".to_string(),
                new_value: b"1".to_vec(),
                sequence_number: 1,
            })
            .await;

        assert!(rx_live.recv().await.is_some());
        assert_eq!(registry.get_by_actor("counter-1").len(), 1);
    }

    #[tokio::test]
    async fn run_exits_once_the_change_channel_is_dropped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fabric = Arc::new(ChannelSendFabric::new());
        let store = trebuchet_state::InMemoryStateStore::new();
        let receiver = store.subscribe_changes();
        let bridge = ChangeFeedBridge::new(registry, fabric);
        let handle = bridge.spawn(receiver);
        drop(store);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("bridge should exit once the store is dropped")
            .unwrap();
    }
}
