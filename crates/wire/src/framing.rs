//! Length-prefixed framing for the bidirectional stream transport:
//! `frame = uint32_be(len) ++ bytes(len)`, no trailer.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Envelope, Error};

/// Default cap on a single frame's payload length, guarding against a
/// runaway peer advertising an unbounded length prefix.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// A `tokio_util::codec` implementation of the `uint32_be(len) ++ bytes`
/// frame shape, decoding/encoding [`Envelope`] directly.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_bytes: usize,
}

impl EnvelopeCodec {
    /// Build a codec enforcing `max_frame_bytes` as the largest payload
    /// (not counting the 4-byte length prefix) it will accept.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if len > self.max_frame_bytes {
            return Err(Error::FrameTooLarge {
                size: len,
                max: self.max_frame_bytes,
            });
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let payload = src.split_to(len);
        let envelope = Envelope::decode(&payload)?;
        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = Error;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Error> {
        let payload = item.encode()?;
        if payload.len() > self.max_frame_bytes {
            return Err(Error::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_bytes,
            });
        }
        dst.reserve(4 + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}
