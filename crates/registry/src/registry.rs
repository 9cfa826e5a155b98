//! The connection registry: bridges a stateless host's lack of a
//! long-lived actor process back to its downstream connections, so the
//! change-feed bridge knows who to push a mutation to.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use trebuchet_wire::ActorId;
use uuid::Uuid;

use crate::error::{Error, Result};

/// One subscription: a downstream connection watching one stream on one
/// actor, as of `last_sequence`.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    /// Identifies the downstream connection (however the hosting
    /// platform names its push channels).
    pub connection_id: Uuid,
    /// Actor the subscription is against.
    pub actor_id: ActorId,
    /// Stream the subscription is against.
    pub stream_id: Uuid,
    /// Last sequence number this connection has been sent.
    pub last_sequence: u64,
    /// When this record was created.
    pub connected_at: DateTime<Utc>,
    /// How long the record may go unrefreshed before [`ConnectionRegistry::purge_expired`]
    /// removes it.
    pub ttl: Duration,
}

impl ConnectionRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.connected_at);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age > ttl,
            Err(_) => false,
        }
    }
}

/// Persists `{connectionID, actorID, streamID, lastSequence, connectedAt,
/// ttl}` keyed by connection id, with a secondary index by actor id so
/// the change-feed bridge can fan a mutation out to every subscriber.
#[derive(Default)]
pub struct ConnectionRegistry {
    records: DashMap<Uuid, ConnectionRecord>,
    by_actor: DashMap<String, std::collections::HashSet<Uuid>>,
}

impl ConnectionRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription.
    pub fn register(
        &self,
        connection_id: Uuid,
        actor_id: ActorId,
        stream_id: Uuid,
        last_sequence: u64,
        ttl: Duration,
    ) {
        self.by_actor
            .entry(actor_id.id.clone())
            .or_default()
            .insert(connection_id);
        self.records.insert(
            connection_id,
            ConnectionRecord {
                connection_id,
                actor_id,
                stream_id,
                last_sequence,
                connected_at: Utc::now(),
                ttl,
            },
        );
    }

    /// Repoint an existing connection's subscription at a different
    /// actor/stream, e.g. when a single downstream connection is reused
    /// across subscriptions.
    pub fn subscribe(&self, connection_id: Uuid, actor_id: ActorId, stream_id: Uuid, last_sequence: u64) -> Result<()> {
        let mut record = self
            .records
            .get_mut(&connection_id)
            .ok_or(Error::UnknownConnection(connection_id))?;

        if record.actor_id.id != actor_id.id {
            self.remove_from_index(&record.actor_id.id, connection_id);
            self.by_actor.entry(actor_id.id.clone()).or_default().insert(connection_id);
        }

        record.actor_id = actor_id;
        record.stream_id = stream_id;
        record.last_sequence = last_sequence;
        Ok(())
    }

    /// Remove a connection's record entirely.
    pub fn unregister(&self, connection_id: Uuid) {
        if let Some((_, record)) = self.records.remove(&connection_id) {
            self.remove_from_index(&record.actor_id.id, connection_id);
        }
    }

    /// Advance a connection's dedup checkpoint after a successful send.
    pub fn update_sequence(&self, connection_id: Uuid, sequence: u64) -> Result<()> {
        let mut record = self
            .records
            .get_mut(&connection_id)
            .ok_or(Error::UnknownConnection(connection_id))?;
        record.last_sequence = sequence;
        Ok(())
    }

    /// Every live subscription against `actor_id`.
    pub fn get_by_actor(&self, actor_id: &str) -> Vec<ConnectionRecord> {
        let Some(ids) = self.by_actor.get(actor_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .collect()
    }

    /// Drop every record whose TTL has elapsed since it was created.
    /// Call periodically; the registry does not run its own timer.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        let expired: Vec<Uuid> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();
        for connection_id in expired {
            debug!(%connection_id, "purging expired connection record");
            self.unregister(connection_id);
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True iff no records are live.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn remove_from_index(&self, actor_id: &str, connection_id: Uuid) {
        if let Some(mut ids) = self.by_actor.get_mut(actor_id) {
            ids.remove(&connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: &str) -> ActorId {
        ActorId::new(id, "127.0.0.1", 9000)
    }

    #[test]
    fn get_by_actor_returns_every_subscription_for_that_actor() {
        let registry = ConnectionRegistry::new();
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        registry.register(conn_a, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(300));
        registry.register(conn_b, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(300));

        let records = registry.get_by_actor("counter-1");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn unregister_removes_from_both_the_primary_and_secondary_index() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        registry.register(conn, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(300));
        registry.unregister(conn);
        assert!(registry.get_by_actor("counter-1").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn subscribe_repoints_the_secondary_index_when_the_actor_changes() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        registry.register(conn, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(300));
        registry.subscribe(conn, actor("counter-2"), Uuid::new_v4(), 5).unwrap();

        assert!(registry.get_by_actor("counter-1").is_empty());
        assert_eq!(registry.get_by_actor("counter-2").len(), 1);
        assert_eq!(registry.get_by_actor("counter-2")[0].last_sequence, 5);
    }

    #[test]
    fn update_sequence_on_an_unknown_connection_is_an_error() {
        let registry = ConnectionRegistry::new();
        let result = registry.update_sequence(Uuid::new_v4(), 1);
        assert!(matches!(result, Err(Error::UnknownConnection(_))));
    }

    #[test]
    fn purge_expired_drops_records_past_their_ttl() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        registry.register(conn, actor("counter-1"), Uuid::new_v4(), 0, Duration::from_secs(0));
        // A zero TTL is immediately expired relative to "now".
        std::thread::sleep(Duration::from_millis(5));
        registry.purge_expired();
        assert!(registry.is_empty());
    }
}
