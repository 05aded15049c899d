//! Client error types.

use std::sync::Arc;

use reql_codec::CodecError;
use reql_protocol::{ErrorKind, ProtocolError, Token};
use thiserror::Error;

/// Errors surfaced by connections, cursors and query executors.
///
/// The error is `Clone` because a single transport failure is delivered to
/// every cursor that was open on the connection.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// Reading from or writing to the transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<std::io::Error>),

    /// A frame header or frame size was invalid.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A response payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A query could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A continuation was requested for a token with no open cursor.
    #[error("unknown token: {0}")]
    UnknownToken(Token),

    /// The connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Establishing the TCP connection timed out.
    #[error("connection timed out")]
    ConnectTimeout,

    /// A mocked executor received a query no expectation matches.
    #[error("unexpected query: {0}")]
    UnexpectedQuery(String),

    /// The server reported an error for the query.
    #[error("{kind:?} error: {message}")]
    Server {
        /// Error category reported by the server.
        kind: ErrorKind,
        /// Server message.
        message: String,
    },

    /// A single result was requested but the query produced none.
    #[error("query returned no results")]
    EmptyResult,

    /// Configuration was invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error may succeed on a fresh connection.
    ///
    /// Retrying is left to the caller; nothing in this crate retries.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ConnectionClosed | Self::ConnectTimeout
        )
    }

    /// Check if the error was reported by the server.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Check if the error ends the whole connection rather than one query.
    #[must_use]
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MalformedFrame { .. } | ProtocolError::PayloadTooLarge(_) => {
                Self::MalformedFrame(err.to_string())
            }
            ProtocolError::Encode(msg) => Self::Encode(msg),
            other => Self::Decode(other.to_string()),
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Transport(Arc::new(e)),
            CodecError::Protocol(e) => e.into(),
            CodecError::ConnectionClosed(_) => Self::ConnectionClosed,
            other => Self::MalformedFrame(other.to_string()),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
