//! Server-side stream state: a bounded, TTL-evicting ring buffer per
//! stream that makes resumption possible, an optional filter gating
//! what gets buffered at all, and fanout to whatever subscribers are
//! currently attached.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use trebuchet_wire::{Base64Bytes, Envelope, StreamFilter};
use uuid::Uuid;

use crate::delta;
use crate::error::{Error, Result};
use crate::filter::FilterState;

/// Bound on a fanout subscriber's channel; a slow subscriber is dropped
/// from the stream's subscriber list rather than slowing down every
/// other subscriber or the publisher.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Tunables for a [`ServerStreamRegistry`]'s per-stream buffers.
#[derive(Debug, Clone, Copy)]
pub struct StreamBufferConfig {
    /// Maximum number of values retained per stream; the oldest is
    /// evicted first once this is exceeded.
    pub max_buffer_size: usize,
    /// A buffered value older than this is evicted lazily (checked on
    /// the next push or resume, not by a background sweep).
    pub ttl: Duration,
    /// Whether published values are delta-encoded against the previous
    /// one (see [`delta`]) or always sent in full.
    pub delta_encoding: bool,
}

impl Default for StreamBufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 100,
            ttl: Duration::from_secs(300),
            delta_encoding: false,
        }
    }
}

#[derive(Debug, Clone)]
struct BufferedItem {
    sequence_number: u64,
    data: Base64Bytes,
    timestamp: chrono::DateTime<Utc>,
    pushed_at: Instant,
}

struct RingBuffer {
    items: VecDeque<BufferedItem>,
    next_sequence: u64,
    config: StreamBufferConfig,
}

impl RingBuffer {
    fn new(config: StreamBufferConfig) -> Self {
        Self {
            items: VecDeque::new(),
            next_sequence: 1,
            config,
        }
    }

    fn evict_expired(&mut self) {
        while let Some(front) = self.items.front() {
            if front.pushed_at.elapsed() > self.config.ttl {
                self.items.pop_front();
            } else {
                break;
            }
        }
    }

    fn push(&mut self, data: Base64Bytes) -> BufferedItem {
        self.evict_expired();
        let sequence_number = self.next_sequence;
        self.next_sequence += 1;
        let item = BufferedItem {
            sequence_number,
            data,
            timestamp: Utc::now(),
            pushed_at: Instant::now(),
        };
        self.items.push_back(item.clone());
        while self.items.len() > self.config.max_buffer_size {
            self.items.pop_front();
        }
        item
    }

    fn latest(&self) -> Option<&BufferedItem> {
        self.items.back()
    }

    /// Values strictly after `last_sequence`, or a miss if the oldest
    /// retained value is already past it.
    fn replay_from(&self, last_sequence: u64) -> Result<Vec<BufferedItem>> {
        if let Some(front) = self.items.front() {
            if front.sequence_number > last_sequence + 1 {
                return Err(Error::ResumeBufferMiss {
                    stream_id: Uuid::nil(),
                    requested: last_sequence,
                    oldest: front.sequence_number,
                });
            }
        } else if last_sequence + 1 < self.next_sequence {
            return Err(Error::ResumeBufferMiss {
                stream_id: Uuid::nil(),
                requested: last_sequence,
                oldest: self.next_sequence,
            });
        }
        Ok(self
            .items
            .iter()
            .filter(|item| item.sequence_number > last_sequence)
            .cloned()
            .collect())
    }
}

struct StreamState {
    actor_id: trebuchet_wire::ActorId,
    target_identifier: String,
    buffer: Mutex<RingBuffer>,
    filter: Mutex<Option<FilterState>>,
    subscribers: Mutex<Vec<mpsc::Sender<Envelope>>>,
}

/// Owns every actively-streamed property's buffer, filter state, and
/// live subscriber fanout, keyed by the `stream_id` a `StreamStart`
/// assigned it.
pub struct ServerStreamRegistry {
    streams: DashMap<Uuid, Arc<StreamState>>,
    config: StreamBufferConfig,
}

impl ServerStreamRegistry {
    /// Build a registry applying `config` to every stream it opens.
    pub fn new(config: StreamBufferConfig) -> Self {
        Self {
            streams: DashMap::new(),
            config,
        }
    }

    /// Register a new stream, as produced by accepting a streaming
    /// `Invocation`.
    pub fn open(
        &self,
        stream_id: Uuid,
        actor_id: trebuchet_wire::ActorId,
        target_identifier: String,
        filter: Option<StreamFilter>,
    ) {
        self.streams.insert(
            stream_id,
            Arc::new(StreamState {
                actor_id,
                target_identifier,
                buffer: Mutex::new(RingBuffer::new(self.config)),
                filter: Mutex::new(filter.map(FilterState::new)),
                subscribers: Mutex::new(Vec::new()),
            }),
        );
    }

    /// Attach a live subscriber that will receive every subsequent
    /// [`Envelope::StreamData`] published on this stream.
    pub fn subscribe(&self, stream_id: Uuid, sender: mpsc::Sender<Envelope>) -> Result<()> {
        let state = self.streams.get(&stream_id).ok_or(Error::UnknownStream(stream_id))?;
        state.subscribers.lock().push(sender);
        Ok(())
    }

    /// Publish a new value: runs it through the stream's filter (if
    /// any), and when it passes, buffers it and fans it out to every
    /// live subscriber. Returns `None` if the filter suppressed it.
    pub fn publish(&self, stream_id: Uuid, data: Base64Bytes) -> Result<Option<Envelope>> {
        let state = self.streams.get(&stream_id).ok_or(Error::UnknownStream(stream_id))?;

        if let Some(filter) = state.filter.lock().as_mut() {
            if !filter.should_emit(&data) {
                return Ok(None);
            }
        }

        let previous = state.buffer.lock().latest().map(|item| item.data.clone());
        let wire_data = if self.config.delta_encoding {
            delta::encode(previous.as_ref(), &data)
        } else {
            data
        };

        let item = state.buffer.lock().push(wire_data.clone());
        let envelope = Envelope::StreamData {
            stream_id,
            sequence_number: item.sequence_number,
            data: wire_data,
            timestamp: item.timestamp,
        };

        let mut subscribers = state.subscribers.lock();
        subscribers.retain(|tx| tx.try_send(envelope.clone()).is_ok());

        Ok(Some(envelope))
    }

    /// Build the envelopes needed to resume a client from
    /// `last_sequence`, or an error if the buffer has already evicted
    /// past that point.
    pub fn resume(&self, stream_id: Uuid, last_sequence: u64) -> Result<Vec<Envelope>> {
        let state = self.streams.get(&stream_id).ok_or(Error::UnknownStream(stream_id))?;
        let replay = state.buffer.lock().replay_from(last_sequence).map_err(|e| match e {
            Error::ResumeBufferMiss { requested, oldest, .. } => Error::ResumeBufferMiss {
                stream_id,
                requested,
                oldest,
            },
            other => other,
        })?;
        Ok(replay
            .into_iter()
            .map(|item| Envelope::StreamData {
                stream_id,
                sequence_number: item.sequence_number,
                data: item.data,
                timestamp: item.timestamp,
            })
            .collect())
    }

    /// The `(actor_id, target_identifier)` a stream was opened against.
    pub fn route_of(&self, stream_id: Uuid) -> Option<(trebuchet_wire::ActorId, String)> {
        self.streams
            .get(&stream_id)
            .map(|s| (s.actor_id.clone(), s.target_identifier.clone()))
    }

    /// Drop a stream's buffer, filter, and subscriber list entirely.
    pub fn close(&self, stream_id: Uuid) {
        self.streams.remove(&stream_id);
    }

    /// Number of streams currently open.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// True iff no streams are currently open.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trebuchet_wire::ActorId;

    fn actor() -> ActorId {
        ActorId::new("counter-1", "127.0.0.1", 9000)
    }

    fn payload(n: u8) -> Base64Bytes {
        Base64Bytes::new(vec![n])
    }

    #[test]
    fn publish_assigns_increasing_sequence_numbers() {
        let registry = ServerStreamRegistry::new(StreamBufferConfig::default());
        let stream_id = Uuid::new_v4();
        registry.open(stream_id, actor(), "observeCount".into(), None);

        let first = registry.publish(stream_id, payload(1)).unwrap().unwrap();
        let second = registry.publish(stream_id, payload(2)).unwrap().unwrap();

        let Envelope::StreamData { sequence_number: s1, .. } = first else {
            panic!()
        };
        let Envelope::StreamData { sequence_number: s2, .. } = second else {
            panic!()
        };
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
    }

    #[test]
    fn resume_replays_values_after_the_requested_sequence() {
        let registry = ServerStreamRegistry::new(StreamBufferConfig::default());
        let stream_id = Uuid::new_v4();
        registry.open(stream_id, actor(), "observeCount".into(), None);
        registry.publish(stream_id, payload(1)).unwrap();
        registry.publish(stream_id, payload(2)).unwrap();
        registry.publish(stream_id, payload(3)).unwrap();

        let replay = registry.resume(stream_id, 1).unwrap();
        assert_eq!(replay.len(), 2);
    }

    #[test]
    fn resume_past_the_evicted_window_is_a_buffer_miss() {
        let config = StreamBufferConfig {
            max_buffer_size: 2,
            ..StreamBufferConfig::default()
        };
        let registry = ServerStreamRegistry::new(config);
        let stream_id = Uuid::new_v4();
        registry.open(stream_id, actor(), "observeCount".into(), None);
        for n in 1..=5u8 {
            registry.publish(stream_id, payload(n)).unwrap();
        }

        let result = registry.resume(stream_id, 1);
        assert!(matches!(result, Err(Error::ResumeBufferMiss { .. })));
    }

    #[test]
    fn filter_suppresses_publish_when_value_is_unchanged() {
        let registry = ServerStreamRegistry::new(StreamBufferConfig::default());
        let stream_id = Uuid::new_v4();
        registry.open(
            stream_id,
            actor(),
            "observeCount".into(),
            Some(StreamFilter::Predefined {
                name: "changed".into(),
                params: serde_json::json!({}),
            }),
        );

        let data = Base64Bytes::new(serde_json::to_vec(&serde_json::json!(1)).unwrap());
        assert!(registry.publish(stream_id, data.clone()).unwrap().is_some());
        assert!(registry.publish(stream_id, data).unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribers_receive_published_envelopes() {
        let registry = ServerStreamRegistry::new(StreamBufferConfig::default());
        let stream_id = Uuid::new_v4();
        registry.open(stream_id, actor(), "observeCount".into(), None);

        let (tx, mut rx) = mpsc::channel(4);
        registry.subscribe(stream_id, tx).unwrap();
        registry.publish(stream_id, payload(7)).unwrap();

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Envelope::StreamData { .. }));
    }
}
