//! The state-store contract every actor host consumes for durable,
//! versioned per-actor state, plus an in-memory reference implementation
//! used in tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// Bound on the change-feed broadcast channel; a subscriber that falls
/// this far behind starts missing events (observed as `Lagged` on its
/// `Receiver`) rather than holding the channel open unbounded.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// One per-key mutation, broadcast to every [`StateStore::subscribe_changes`]
/// subscriber after a successful `save`/`saveIfVersion`.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Key that changed.
    pub actor_id: String,
    /// The value as of this change.
    pub new_value: Vec<u8>,
    /// The version after this change; doubles as the change-feed's
    /// monotonic sequence number for the key.
    pub sequence_number: u64,
}

/// The durable payload behind one key: opaque bytes, a version used for
/// optimistic concurrency, and the time of the last write.
#[derive(Debug, Clone)]
struct Record {
    payload: Vec<u8>,
    version: u64,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

/// Durable, versioned key-value storage keyed by actor id.
///
/// Version `0` means "not yet created". After a successful save the
/// observed version is `expected_version + 1` for an existing key, or
/// `1` for a newly-created one.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the current payload and version, if the key exists.
    async fn load(&self, id: &str) -> Option<(Vec<u8>, u64)>;

    /// Unconditionally overwrite `id`, incrementing its version.
    async fn save(&self, id: &str, payload: Vec<u8>) -> u64;

    /// Overwrite `id` only if its current version is `expected_version`
    /// (or the key doesn't exist yet and `expected_version == 0`).
    async fn save_if_version(&self, id: &str, payload: Vec<u8>, expected_version: u64) -> Result<u64>;

    /// The current version of `id`, if it exists.
    async fn get_version(&self, id: &str) -> Option<u64>;

    /// Remove `id` entirely.
    async fn delete(&self, id: &str);

    /// True iff `id` currently has a value.
    async fn exists(&self, id: &str) -> bool;

    /// Subscribe to every successful mutation across every key.
    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent>;

    /// `load -> transform -> saveIfVersion`, retrying on conflict by
    /// reloading and re-applying `transform` up to `max_retries` times.
    async fn update_with_retry(
        &self,
        id: &str,
        max_retries: u32,
        transform: &(dyn Fn(Option<Vec<u8>>) -> Result<Vec<u8>> + Send + Sync),
    ) -> Result<u64> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let current = self.load(id).await;
            let (current_payload, current_version) = match current {
                Some((payload, version)) => (Some(payload), version),
                None => (None, 0),
            };
            let next_payload = transform(current_payload)?;

            match self.save_if_version(id, next_payload, current_version).await {
                Ok(version) => return Ok(version),
                Err(conflict @ Error::VersionConflict { .. }) => {
                    if attempts >= max_retries {
                        return Err(Error::MaxRetriesExceeded {
                            attempts,
                            last_conflict: Box::new(conflict),
                        });
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }
}

/// A [`StateStore`] backed by an in-process [`DashMap`]; state does not
/// survive the process, but every optimistic-concurrency and
/// change-feed semantic behaves identically to a durable implementation.
pub struct InMemoryStateStore {
    records: DashMap<String, Record>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl InMemoryStateStore {
    /// Build an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            changes,
        }
    }

    fn publish(&self, id: &str, new_value: Vec<u8>, sequence_number: u64) {
        // No subscribers is not an error: the bridge may not have
        // started yet, or this deployment may not use one at all.
        let _ = self.changes.send(ChangeEvent {
            actor_id: id.to_string(),
            new_value,
            sequence_number,
        });
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, id: &str) -> Option<(Vec<u8>, u64)> {
        self.records.get(id).map(|r| (r.payload.clone(), r.version))
    }

    async fn save(&self, id: &str, payload: Vec<u8>) -> u64 {
        let version = {
            let mut entry = self.records.entry(id.to_string()).or_insert_with(|| Record {
                payload: Vec::new(),
                version: 0,
                updated_at: Utc::now(),
            });
            entry.version += 1;
            entry.payload = payload.clone();
            entry.updated_at = Utc::now();
            entry.version
        };
        self.publish(id, payload, version);
        version
    }

    async fn save_if_version(&self, id: &str, payload: Vec<u8>, expected_version: u64) -> Result<u64> {
        match self.records.entry(id.to_string()) {
            Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    return Err(Error::VersionConflict {
                        expected: expected_version,
                        actual: 0,
                    });
                }
                vacant.insert(Record {
                    payload: payload.clone(),
                    version: 1,
                    updated_at: Utc::now(),
                });
                self.publish(id, payload, 1);
                Ok(1)
            }
            Entry::Occupied(mut occupied) => {
                let actual = occupied.get().version;
                if actual != expected_version {
                    return Err(Error::VersionConflict {
                        expected: expected_version,
                        actual,
                    });
                }
                let new_version = actual + 1;
                occupied.get_mut().payload = payload.clone();
                occupied.get_mut().version = new_version;
                occupied.get_mut().updated_at = Utc::now();
                self.publish(id, payload, new_version);
                Ok(new_version)
            }
        }
    }

    async fn get_version(&self, id: &str) -> Option<u64> {
        self.records.get(id).map(|r| r.version)
    }

    async fn delete(&self, id: &str) {
        self.records.remove(id);
    }

    async fn exists(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_if_version_zero_creates_a_new_key() {
        let store = InMemoryStateStore::new();
        let version = store.save_if_version("a", b"v1".to_vec(), 0).await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(store.load("a").await, Some((b"v1".to_vec(), 1)));
    }

    #[tokio::test]
    async fn save_if_version_zero_against_an_existing_key_conflicts() {
        let store = InMemoryStateStore::new();
        store.save("a", b"v1".to_vec()).await;
        let result = store.save_if_version("a", b"v2".to_vec(), 0).await;
        assert!(matches!(result, Err(Error::VersionConflict { expected: 0, actual: 1 })));
    }

    #[tokio::test]
    async fn mismatched_version_is_rejected() {
        let store = InMemoryStateStore::new();
        store.save("a", b"v1".to_vec()).await;
        let result = store.save_if_version("a", b"v2".to_vec(), 5).await;
        assert!(matches!(result, Err(Error::VersionConflict { expected: 5, actual: 1 })));
    }

    #[tokio::test]
    async fn unconditional_save_always_increments_version() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.save("a", b"v1".to_vec()).await, 1);
        assert_eq!(store.save("a", b"v2".to_vec()).await, 2);
        assert_eq!(store.get_version("a").await, Some(2));
    }

    #[tokio::test]
    async fn delete_and_exists_reflect_current_state() {
        let store = InMemoryStateStore::new();
        assert!(!store.exists("a").await);
        store.save("a", b"v1".to_vec()).await;
        assert!(store.exists("a").await);
        store.delete("a").await;
        assert!(!store.exists("a").await);
    }

    #[tokio::test]
    async fn update_with_retry_applies_transform_against_current_value() {
        let store = InMemoryStateStore::new();
        store.save("counter", b"1".to_vec()).await;
        let version = store
            .update_with_retry("counter", 3, &|current| {
                let n: i64 = current
                    .map(|bytes| String::from_utf8(bytes).unwrap().parse().unwrap())
                    .unwrap_or(0);
                Ok((n + 1).to_string().into_bytes())
            })
            .await
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(store.load("counter").await.unwrap().0, b"2".to_vec());
    }

    /// A store whose `save_if_version` always conflicts, to exercise
    /// retry exhaustion deterministically without a real race.
    struct AlwaysConflictingStore {
        inner: InMemoryStateStore,
    }

    #[async_trait]
    impl StateStore for AlwaysConflictingStore {
        async fn load(&self, id: &str) -> Option<(Vec<u8>, u64)> {
            self.inner.load(id).await
        }
        async fn save(&self, id: &str, payload: Vec<u8>) -> u64 {
            self.inner.save(id, payload).await
        }
        async fn save_if_version(&self, _id: &str, _payload: Vec<u8>, expected_version: u64) -> Result<u64> {
            Err(Error::VersionConflict {
                expected: expected_version,
                actual: expected_version + 1,
            })
        }
        async fn get_version(&self, id: &str) -> Option<u64> {
            self.inner.get_version(id).await
        }
        async fn delete(&self, id: &str) {
            self.inner.delete(id).await
        }
        async fn exists(&self, id: &str) -> bool {
            self.inner.exists(id).await
        }
        fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
            self.inner.subscribe_changes()
        }
    }

    #[tokio::test]
    async fn update_with_retry_exhausts_after_repeated_conflicts() {
        let store = AlwaysConflictingStore {
            inner: InMemoryStateStore::new(),
        };
        store.save("counter", b"1".to_vec()).await;
        let result = store
            .update_with_retry("counter", 2, &|current| Ok(current.unwrap_or_default()))
            .await;
        match result {
            Err(Error::MaxRetriesExceeded { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribers_observe_every_successful_mutation() {
        let store = InMemoryStateStore::new();
        let mut rx = store.subscribe_changes();
        store.save("a", b"v1".to_vec()).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.actor_id, "a");
        assert_eq!(event.new_value, b"v1".to_vec());
        assert_eq!(event.sequence_number, 1);
    }
}
