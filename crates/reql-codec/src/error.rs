//! Codec error types.

use reql_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur while framing bytes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// I/O error on the underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame header or payload was invalid.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Frame announced a payload larger than the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced payload length.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Stream ended in the middle of a frame.
    #[error("connection closed with {0} bytes of a partial frame buffered")]
    ConnectionClosed(usize),
}
