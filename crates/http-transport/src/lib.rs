//! The HTTP request/response gateway: the second of the two reference
//! transports, trading a persistent duplex socket for one round trip per
//! invocation, with streaming methods answered as Server-Sent Events.

mod client;
mod error;
mod health;
mod protocol;
mod server;

pub use client::HttpRpcClient;
pub use error::{Error, Result};
pub use health::{AlwaysHealthy, HealthProvider, HealthSnapshot, HostStatus};
pub use protocol::{InvokeRequest, InvokeResponse, StreamFrame};
pub use server::HttpGateway;
