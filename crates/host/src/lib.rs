//! The server host: binds a transport, drives the accept/receive loop
//! into an [`trebuchet_actor::ActorSystem`], and enforces the
//! `running -> draining -> stopped` lifecycle external callers observe
//! through `GET /health`.

mod error;
mod host;
mod lifecycle;

pub use error::{Error, Result};
pub use host::{ServerHost, DEFAULT_DRAIN_DEADLINE};
pub use lifecycle::{InvocationGuard, Lifecycle};
