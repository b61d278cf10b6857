//! Length-prefixed frame codec
//!
//! Frame format:
//! ```text
//! +-----------------+------------------------+
//! | length          | payload                |
//! | (4 bytes, BE)   | (length bytes, JSON)   |
//! +-----------------+------------------------+
//! ```
//!
//! Decoding is transactional: the header is peeked, and nothing is consumed
//! until the whole frame is buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::error::AppError;

/// Frame header size: 4 bytes length
pub const FRAME_HEADER_SIZE: usize = 4;

/// Splits a byte stream into payloads and prefixes outgoing payloads
#[derive(Debug, Clone, Copy)]
pub struct Framer {
    max_frame_len: usize,
}

impl Framer {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Encode a payload into a new length-prefixed buffer
    pub fn frame(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        buf.freeze()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for Framer {
    type Item = Bytes;
    type Error = AppError;

    /// Returns Ok(Some(payload)) if a full frame was buffered, Ok(None) if
    /// more data is needed. `src` is untouched in the latter case.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, AppError> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming
        let payload_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if payload_len > self.max_frame_len {
            return Err(AppError::FrameTooLarge {
                len: payload_len,
                max: self.max_frame_len,
            });
        }

        let total_size = FRAME_HEADER_SIZE + payload_len;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        Ok(Some(src.split_to(payload_len).freeze()))
    }
}

impl Encoder<Bytes> for Framer {
    type Error = AppError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), AppError> {
        if payload.len() > self.max_frame_len {
            return Err(AppError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }
        dst.reserve(FRAME_HEADER_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}
