//! Per-endpoint connection pooling: reuse an open [`Connection`] instead
//! of reconnecting on every call, and evict one that has gone idle past
//! `idle_timeout` or that the reader task has observed closed.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use crate::config::PoolConfig;
use crate::transport::{Connection, Transport};
use crate::Result;

struct PooledEntry {
    connection: Arc<dyn Connection>,
    last_used: Instant,
}

/// Caches one [`Connection`] per endpoint behind a [`Transport`],
/// evicting idle or dead entries on access.
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    config: PoolConfig,
    entries: DashMap<String, PooledEntry>,
}

impl ConnectionPool {
    /// Build a pool over `transport`, using `config` for idle eviction.
    pub fn new(transport: Arc<dyn Transport>, config: PoolConfig) -> Self {
        Self {
            transport,
            config,
            entries: DashMap::new(),
        }
    }

    /// Get a live connection to `endpoint`, reusing a pooled one if it's
    /// neither closed nor past its idle timeout, otherwise connecting
    /// fresh and replacing the pooled entry.
    pub async fn get(&self, endpoint: &str) -> Result<Arc<dyn Connection>> {
        if let Some(mut entry) = self.entries.get_mut(endpoint) {
            let stale = entry.last_used.elapsed() > self.config.idle_timeout;
            if !stale && !entry.connection.is_closed() {
                entry.last_used = Instant::now();
                return Ok(Arc::clone(&entry.connection));
            }
            debug!(endpoint, stale, "evicting pooled connection");
        }

        let connection = self.transport.connect(endpoint).await?;
        self.entries.insert(
            endpoint.to_string(),
            PooledEntry {
                connection: Arc::clone(&connection),
                last_used: Instant::now(),
            },
        );
        Ok(connection)
    }

    /// Drop every pooled connection without closing them explicitly
    /// (readers notice on their own once the socket goes away); used on
    /// host shutdown to release the pool's references.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of endpoints currently holding a pooled connection.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff no endpoint currently holds a pooled connection.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use trebuchet_wire::Envelope;

    struct CountingTransport {
        connects: AtomicU32,
    }

    struct StubConnection {
        endpoint: String,
    }

    #[async_trait]
    impl Connection for StubConnection {
        async fn send(&self, _envelope: Envelope) -> Result<()> {
            Ok(())
        }
        async fn recv(&self) -> Option<Envelope> {
            None
        }
        fn endpoint(&self) -> &str {
            &self.endpoint
        }
        fn is_closed(&self) -> bool {
            false
        }
        async fn close(&self) {}
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubConnection {
                endpoint: endpoint.to_string(),
            }))
        }
        async fn listen(&self, _bind_addr: &str) -> Result<Box<dyn crate::transport::Listener>> {
            unimplemented!("not needed for pool tests")
        }
    }

    #[tokio::test]
    async fn reuses_a_live_connection_for_the_same_endpoint() {
        let transport = Arc::new(CountingTransport {
            connects: AtomicU32::new(0),
        });
        let pool = ConnectionPool::new(transport.clone(), PoolConfig::default());

        pool.get("127.0.0.1:9000").await.unwrap();
        pool.get("127.0.0.1:9000").await.unwrap();

        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn connects_separately_per_distinct_endpoint() {
        let transport = Arc::new(CountingTransport {
            connects: AtomicU32::new(0),
        });
        let pool = ConnectionPool::new(transport.clone(), PoolConfig::default());

        pool.get("127.0.0.1:9000").await.unwrap();
        pool.get("127.0.0.1:9001").await.unwrap();

        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn reconnects_once_idle_timeout_elapses() {
        let transport = Arc::new(CountingTransport {
            connects: AtomicU32::new(0),
        });
        let config = PoolConfig {
            idle_timeout: std::time::Duration::from_millis(5),
            write_timeout: std::time::Duration::from_secs(30),
        };
        let pool = ConnectionPool::new(transport.clone(), config);

        pool.get("127.0.0.1:9000").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        pool.get("127.0.0.1:9000").await.unwrap();

        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    }
}
