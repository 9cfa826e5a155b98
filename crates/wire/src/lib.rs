//! Envelope types and length-prefixed framing shared by every Trebuchet
//! transport.
//!
//! This crate knows nothing about sockets, HTTP, or actor dispatch — it
//! only defines the wire shape and a codec for the framed stream transport.

mod envelope;
mod error;
mod framing;

pub use envelope::{
    ActorId, Base64Bytes, Envelope, StreamEndReason, StreamFilter, TraceContext,
};
pub use error::{Error, Result};
pub use framing::{EnvelopeCodec, DEFAULT_MAX_FRAME_BYTES};

/// Protocol version implemented by this crate. A missing
/// `Invocation.protocol_version` on the wire decodes as `1`.
pub const CURRENT_PROTOCOL_VERSION: u32 = 1;

/// Negotiate a protocol version between a client's `[min, max]` range and a
/// server's `[min, max]` range.
///
/// Returns `min(client_max, server_max)` when the ranges intersect, or
/// `None` if negotiation fails.
pub fn negotiate_protocol_version(
    client_range: (u32, u32),
    server_range: (u32, u32),
) -> Option<u32> {
    let lo = client_range.0.max(server_range.0);
    let hi = client_range.1.min(server_range.1);
    if lo > hi {
        None
    } else {
        Some(hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_overlapping_ranges_to_the_min_of_the_maxes() {
        assert_eq!(negotiate_protocol_version((1, 3), (2, 5)), Some(3));
        assert_eq!(negotiate_protocol_version((1, 1), (1, 1)), Some(1));
    }

    #[test]
    fn fails_negotiation_on_disjoint_ranges() {
        assert_eq!(negotiate_protocol_version((1, 2), (3, 4)), None);
    }
}
