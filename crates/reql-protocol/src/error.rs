//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Frame header was not exactly the expected size.
    #[error("malformed frame: expected {expected} header bytes, got {actual}")]
    MalformedFrame {
        /// Expected header size.
        expected: usize,
        /// Actual number of bytes supplied.
        actual: usize,
    },

    /// Payload length does not fit in the 32-bit length field.
    #[error("payload of {0} bytes exceeds the frame length field")]
    PayloadTooLarge(usize),

    /// Payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Response carried a type code this driver does not know.
    #[error("unknown response type: {0}")]
    UnknownResponseType(u64),

    /// Query carried a type code this driver does not know.
    #[error("unknown query type: {0}")]
    UnknownQueryType(u64),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
