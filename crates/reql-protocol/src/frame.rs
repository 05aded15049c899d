//! Frame envelope definitions.
//!
//! Every request and response travels inside a frame made of a fixed
//! 12-byte header followed by a length-prefixed payload. The header carries
//! the request token so that responses can be routed back to the query that
//! produced them.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::token::Token;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Default upper bound on a single frame payload (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Frame header.
///
/// Layout is an 8-byte little-endian token followed by a 4-byte
/// little-endian payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    /// Token correlating this frame with a query.
    pub token: Token,
    /// Length of the payload that follows the header.
    pub length: u32,
}

impl FrameHeader {
    /// Create a new frame header.
    #[must_use]
    pub const fn new(token: Token, length: u32) -> Self {
        Self { token, length }
    }

    /// Create a header describing `payload`.
    pub fn for_payload(token: Token, payload: &[u8]) -> Result<Self, ProtocolError> {
        let length = u32::try_from(payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
        Ok(Self::new(token, length))
    }

    /// Parse a frame header.
    ///
    /// The input must be exactly [`FRAME_HEADER_SIZE`] bytes.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        let header: &[u8; FRAME_HEADER_SIZE] =
            src.try_into()
                .map_err(|_| ProtocolError::MalformedFrame {
                    expected: FRAME_HEADER_SIZE,
                    actual: src.len(),
                })?;

        let mut token = [0u8; 8];
        token.copy_from_slice(&header[..8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&header[8..]);

        Ok(Self {
            token: Token::new(u64::from_le_bytes(token)),
            length: u32::from_le_bytes(length),
        })
    }

    /// Encode the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u64_le(self.token.get());
        dst.put_u32_le(self.length);
    }

    /// Encode the header into a fixed-size array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[..8].copy_from_slice(&self.token.get().to_le_bytes());
        out[8..].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Payload length as `usize`.
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length as usize
    }
}

/// Encode a complete frame: header followed by `payload`.
pub fn encode_frame(token: Token, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let header = FrameHeader::for_payload(token, payload)?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    header.encode(&mut buf);
    buf.put_slice(payload);
    Ok(buf.freeze())
}
