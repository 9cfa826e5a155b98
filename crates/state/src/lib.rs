//! The persistent state-store contract: optimistic-concurrency
//! load/save/delete keyed by actor id, a retrying update helper, and a
//! change feed other crates (`trebuchet-registry`) bridge into stream
//! broadcasts.

mod error;
mod store;

pub use error::{Error, Result};
pub use store::{ChangeEvent, InMemoryStateStore, StateStore};
