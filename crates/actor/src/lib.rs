//! Actor identity, streamed properties, and the system that dispatches
//! envelopes to local handlers or routes them to remote peers.
//!
//! `#[derive(Actor)]` from `trebuchet-macros` generates the accessor
//! triple (`name()`, `set_name()`, `observe_name()`) for any field typed
//! `StreamedProperty<T>`; this crate provides the `StreamedProperty<T>`
//! type itself plus everything downstream of a dispatched call.

mod error;
mod handler;
mod proxy;
mod streamed_property;
mod system;

pub use error::{Error, Result};
pub use handler::{ActorHandler, DispatchResult, StreamDispatchResult};
pub use proxy::{ActorRef, LocalReference, RemoteProxy};
pub use streamed_property::{ObserveStream, StreamedProperty};
pub use system::{ActorSystem, ProtocolRange};

pub use trebuchet_wire::ActorId;

/// Re-exported so dependents only need `use trebuchet_actor::Actor;` to
/// pull in both the trait surface and the `#[derive(Actor)]` macro.
pub use trebuchet_macros::Actor;
