//! Connection registry, send fabric, and change-feed bridge for
//! stateless hosts: ties a [`trebuchet_state::StateStore`] mutation back
//! to the downstream connections observing it.

mod bridge;
mod error;
mod registry;
mod sender;

pub use bridge::ChangeFeedBridge;
pub use error::{Error, Result};
pub use registry::{ConnectionRecord, ConnectionRegistry};
pub use sender::{ChannelSendFabric, SendFabric};
