//! ReQL frame codec implementation.

use bytes::{BufMut, Bytes, BytesMut};
use reql_protocol::frame::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, FrameHeader};
use reql_protocol::Token;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// A frame: the token from the header and the raw payload that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Token correlating the frame with a query.
    pub token: Token,
    /// Payload bytes (excluding header).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub fn new(token: Token, payload: impl Into<Bytes>) -> Self {
        Self {
            token,
            payload: payload.into(),
        }
    }

    /// Total encoded size including header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Frame codec for tokio-util framing.
///
/// Decoding waits until a whole header and its whole payload are buffered;
/// encoding writes the header followed by the payload. Both directions
/// reject payloads larger than the configured maximum.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the default maximum frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the maximum accepted payload size.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.min(u32::MAX as usize);
        self
    }

    /// Maximum accepted payload size.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::decode(&src[..FRAME_HEADER_SIZE])?;
        let length = header.payload_length();

        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame_bytes = src.split_to(total);
        let payload = frame_bytes.split_off(FRAME_HEADER_SIZE).freeze();

        tracing::trace!(token = %header.token, length, "decoded frame");

        Ok(Some(Frame::new(header.token, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(CodecError::ConnectionClosed(src.len())),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.payload.len();
        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let header = FrameHeader::for_payload(item.token, &item.payload)?;

        dst.reserve(item.total_size());
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(token = %item.token, length, "encoded frame");

        Ok(())
    }
}
