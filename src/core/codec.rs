//! Length-prefixed frame codec.
//!
//! ```text
//! [Length(4, u32 little-endian)] [Payload(Length)]
//! ```
//!
//! The declared length is checked against the configured `[min, max]` window
//! before anything is allocated, so a corrupt or hostile header never causes a
//! large buffer reservation.

use crate::config::{DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_MIN_MESSAGE_LENGTH};
use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length header in bytes.
pub const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    min_length: usize,
    max_length: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_MESSAGE_LENGTH, DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl FrameCodec {
    pub fn new(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length,
        }
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn check_length(&self, length: usize) -> Result<()> {
        if length < self.min_length || length > self.max_length {
            return Err(ProtocolError::InvalidMessageLength {
                length,
                min: self.min_length,
                max: self.max_length,
            });
        }
        Ok(())
    }

    /// Frame a payload into a standalone buffer.
    pub fn encode_frame(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.check_length(payload.len())?;
        let mut out = Vec::with_capacity(LENGTH_PREFIX + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        Ok(out)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut header = [0u8; LENGTH_PREFIX];
        header.copy_from_slice(&src[..LENGTH_PREFIX]);
        let length = u32::from_le_bytes(header) as usize;
        self.check_length(length)?;

        if src.len() < LENGTH_PREFIX + length {
            src.reserve(LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        Ok(Some(src.split_to(length)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None if src.len() < LENGTH_PREFIX => Err(ProtocolError::MissingMessageLength),
            None => Err(ProtocolError::InvalidMessage(
                constants::ERR_TRUNCATED_FRAME.into(),
            )),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.check_length(payload.len())?;
        dst.reserve(LENGTH_PREFIX + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
