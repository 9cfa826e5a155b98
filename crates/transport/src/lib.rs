//! The framed bidirectional socket transport: connect/listen/send over
//! TCP with [`trebuchet_wire::EnvelopeCodec`] framing, a per-endpoint
//! connection pool, and the circuit breaker / retry pair that protect
//! calls against a flaky or overloaded peer.

mod circuit_breaker;
mod config;
mod error;
mod pool;
mod retry;
mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{CircuitBreakerConfig, PoolConfig, RetryConfig};
pub use error::{Error, Result};
pub use pool::ConnectionPool;
pub use retry::RetryExecutor;
pub use transport::{Connection, FramedConnection, FramedSocketTransport, IncomingMessage, Listener, Transport};
