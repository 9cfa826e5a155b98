//! Client-side bookkeeping for an observed stream: sequence dedup,
//! checkpointing, and resumption after a reconnect.
//!
//! A stream is identified by the server-assigned `stream_id` handed back
//! in `StreamStart`. Everything here is indexed by that id; the
//! `(actor_id, target_identifier)` pair only matters when building the
//! `StreamResume` request, since the reconnecting client may be talking
//! to a different server process that has forgotten the id entirely.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use trebuchet_wire::{ActorId, Base64Bytes, StreamEndReason};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Persists the last sequence number observed for a stream, so a process
/// restart can resume rather than re-subscribing from scratch.
///
/// The default in-memory implementation below loses this across process
/// restarts; a durable implementation (file, database) can be swapped in
/// without changing [`ClientStreamRegistry`].
pub trait CheckpointStore: Send + Sync {
    /// Persist `sequence` as the last delivered value for `stream_id`.
    fn save(&self, stream_id: Uuid, sequence: u64);
    /// Load the last persisted sequence for `stream_id`, if any.
    fn load(&self, stream_id: Uuid) -> Option<u64>;
    /// Drop any persisted checkpoint for `stream_id`.
    fn clear(&self, stream_id: Uuid);
}

/// An in-process, non-durable [`CheckpointStore`].
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    sequences: DashMap<Uuid, u64>,
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, stream_id: Uuid, sequence: u64) {
        self.sequences.insert(stream_id, sequence);
    }

    fn load(&self, stream_id: Uuid) -> Option<u64> {
        self.sequences.get(&stream_id).map(|v| *v)
    }

    fn clear(&self, stream_id: Uuid) {
        self.sequences.remove(&stream_id);
    }
}

/// One value or terminal event delivered to a stream consumer.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A `StreamData` payload that passed dedup.
    Data(Base64Bytes),
    /// A non-terminal `StreamError`; a `StreamEnd` always follows.
    Error(String),
    /// The stream has ended; no further events will arrive.
    Ended {
        /// Why the stream ended.
        reason: StreamEndReason,
        /// Detail, present iff `reason == Error`.
        message: Option<String>,
    },
}

/// Bound on a subscriber's event queue before it starts losing events to
/// a full channel (the dedup/resume contract covers `StreamData`
/// ordering, not a guarantee against an indefinitely slow consumer).
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

struct StreamState {
    actor_id: ActorId,
    target_identifier: String,
    last_sequence: u64,
    sender: mpsc::Sender<StreamEvent>,
}

/// Tracks every stream this client currently has open, applying the
/// dedup law (drop or ignore any `sequence_number` not strictly greater
/// than the last one delivered) before handing data to the subscriber.
pub struct ClientStreamRegistry {
    streams: DashMap<Uuid, StreamState>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl ClientStreamRegistry {
    /// Build a registry backed by `checkpoints` for resume support.
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            streams: DashMap::new(),
            checkpoints,
        }
    }

    /// Register a brand-new stream (no prior checkpoint), returning the
    /// receiver its `StreamEvent`s will arrive on.
    pub fn create_remote_stream(
        &self,
        stream_id: Uuid,
        actor_id: ActorId,
        target_identifier: String,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.insert(stream_id, actor_id, target_identifier, 0)
    }

    /// Register a stream being resumed from a checkpoint, starting dedup
    /// at the last persisted sequence number (0 if none was ever saved).
    pub fn create_resumed_stream(
        &self,
        stream_id: Uuid,
        actor_id: ActorId,
        target_identifier: String,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let last_sequence = self.checkpoints.load(stream_id).unwrap_or(0);
        self.insert(stream_id, actor_id, target_identifier, last_sequence)
    }

    fn insert(
        &self,
        stream_id: Uuid,
        actor_id: ActorId,
        target_identifier: String,
        last_sequence: u64,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        if self.streams.contains_key(&stream_id) {
            return Err(Error::AlreadyRegistered(stream_id));
        }
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.streams.insert(
            stream_id,
            StreamState {
                actor_id,
                target_identifier,
                last_sequence,
                sender,
            },
        );
        Ok(receiver)
    }

    /// The `(actor_id, target_identifier)` a stream was opened against,
    /// needed to build a `StreamResume` request after a reconnect.
    pub fn route_of(&self, stream_id: Uuid) -> Option<(ActorId, String)> {
        self.streams
            .get(&stream_id)
            .map(|s| (s.actor_id.clone(), s.target_identifier.clone()))
    }

    /// Apply the dedup law to an incoming `StreamData` and, if it's new,
    /// deliver it and persist the checkpoint.
    ///
    /// Sequence numbers not strictly greater than the last delivered one
    /// are silently dropped: this is expected on every resume (the
    /// server replays from its buffer inclusive of already-seen values)
    /// and is not itself an error.
    pub async fn handle_stream_data(&self, stream_id: Uuid, sequence_number: u64, data: Base64Bytes) {
        let Some(mut state) = self.streams.get_mut(&stream_id) else {
            debug!(%stream_id, "stream_data for unknown stream, dropping");
            return;
        };
        if sequence_number <= state.last_sequence {
            debug!(%stream_id, sequence_number, last = state.last_sequence, "duplicate stream_data dropped");
            return;
        }
        state.last_sequence = sequence_number;
        self.checkpoints.save(stream_id, sequence_number);
        let _ = state.sender.send(StreamEvent::Data(data)).await;
    }

    /// Deliver a non-terminal `StreamError`.
    pub async fn handle_stream_error(&self, stream_id: Uuid, error_message: String) {
        if let Some(state) = self.streams.get(&stream_id) {
            let _ = state.sender.send(StreamEvent::Error(error_message)).await;
        }
    }

    /// Deliver the terminal event and remove the stream's bookkeeping.
    /// The checkpoint is left in place: a later resubscribe under the
    /// same `stream_id` (unusual, but not forbidden) would otherwise
    /// replay data the consumer already saw.
    pub async fn handle_stream_end(
        &self,
        stream_id: Uuid,
        reason: StreamEndReason,
        message: Option<String>,
    ) {
        if let Some((_, state)) = self.streams.remove(&stream_id) {
            let _ = state.sender.send(StreamEvent::Ended { reason, message }).await;
        }
    }

    /// Drop a stream's bookkeeping without delivering a terminal event,
    /// e.g. because the client itself unsubscribed.
    pub fn remove_stream(&self, stream_id: Uuid) {
        self.streams.remove(&stream_id);
    }

    /// Number of streams currently tracked.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// True iff no streams are currently tracked.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> ActorId {
        ActorId::new("counter-1", "127.0.0.1", 9000)
    }

    #[tokio::test]
    async fn delivers_in_order_and_drops_duplicates() {
        let registry = ClientStreamRegistry::new(Arc::new(InMemoryCheckpointStore::default()));
        let stream_id = Uuid::new_v4();
        let mut rx = registry
            .create_remote_stream(stream_id, actor(), "observeCount".into())
            .unwrap();

        registry
            .handle_stream_data(stream_id, 1, Base64Bytes::new(vec![1]))
            .await;
        registry
            .handle_stream_data(stream_id, 1, Base64Bytes::new(vec![99]))
            .await; // duplicate, dropped
        registry
            .handle_stream_data(stream_id, 2, Base64Bytes::new(vec![2]))
            .await;

        let Some(StreamEvent::Data(first)) = rx.recv().await else {
            panic!("expected data")
        };
        assert_eq!(first.as_slice(), &[1]);
        let Some(StreamEvent::Data(second)) = rx.recv().await else {
            panic!("expected data")
        };
        assert_eq!(second.as_slice(), &[2]);
    }

    #[tokio::test]
    async fn resume_picks_up_dedup_state_from_checkpoint() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::default());
        let stream_id = Uuid::new_v4();
        checkpoints.save(stream_id, 5);

        let registry = ClientStreamRegistry::new(checkpoints);
        let mut rx = registry
            .create_resumed_stream(stream_id, actor(), "observeCount".into())
            .unwrap();

        registry
            .handle_stream_data(stream_id, 5, Base64Bytes::new(vec![5]))
            .await; // already seen per checkpoint, dropped
        registry
            .handle_stream_data(stream_id, 6, Base64Bytes::new(vec![6]))
            .await;

        let Some(StreamEvent::Data(only)) = rx.recv().await else {
            panic!("expected data")
        };
        assert_eq!(only.as_slice(), &[6]);
    }

    #[tokio::test]
    async fn stream_end_removes_bookkeeping_and_delivers_terminal_event() {
        let registry = ClientStreamRegistry::new(Arc::new(InMemoryCheckpointStore::default()));
        let stream_id = Uuid::new_v4();
        let mut rx = registry
            .create_remote_stream(stream_id, actor(), "observeCount".into())
            .unwrap();

        registry
            .handle_stream_end(stream_id, StreamEndReason::Completed, None)
            .await;

        assert!(matches!(
            rx.recv().await,
            Some(StreamEvent::Ended {
                reason: StreamEndReason::Completed,
                ..
            })
        ));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn route_of_recovers_actor_and_target_for_resume_requests() {
        let registry = ClientStreamRegistry::new(Arc::new(InMemoryCheckpointStore::default()));
        let stream_id = Uuid::new_v4();
        registry
            .create_remote_stream(stream_id, actor(), "observeCount".into())
            .unwrap();

        let (route_actor, target) = registry.route_of(stream_id).unwrap();
        assert_eq!(route_actor, actor());
        assert_eq!(target, "observeCount");
    }
}
