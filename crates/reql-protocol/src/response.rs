//! Response payloads.
//!
//! The server answers each query frame with a JSON object whose `t` field
//! selects the response type. The raw object is decoded once, at the
//! boundary, into the closed [`ResponseKind`] so that the rest of the driver
//! never inspects untyped JSON to find out what it received.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::frame::encode_frame;
use crate::token::Token;

/// Response type codes (`Response.ResponseType` in ql2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseType {
    /// A single value.
    SuccessAtom = 1,
    /// The final batch of a sequence.
    SuccessSequence = 2,
    /// A batch of a sequence with more to follow.
    SuccessPartial = 3,
    /// Acknowledgement of `NOREPLY_WAIT`.
    WaitComplete = 4,
    /// Server information.
    ServerInfo = 5,
    /// The client sent something invalid.
    ClientError = 16,
    /// The query failed to compile.
    CompileError = 17,
    /// The query failed while running.
    RuntimeError = 18,
}

impl ResponseType {
    /// Create a response type from its wire code.
    pub fn from_code(code: u64) -> Result<Self, ProtocolError> {
        match code {
            1 => Ok(Self::SuccessAtom),
            2 => Ok(Self::SuccessSequence),
            3 => Ok(Self::SuccessPartial),
            4 => Ok(Self::WaitComplete),
            5 => Ok(Self::ServerInfo),
            16 => Ok(Self::ClientError),
            17 => Ok(Self::CompileError),
            18 => Ok(Self::RuntimeError),
            _ => Err(ProtocolError::UnknownResponseType(code)),
        }
    }
}

/// Category of a server-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The driver sent a malformed request.
    Client,
    /// The query did not compile.
    Compile,
    /// The query failed at runtime.
    Runtime,
}

impl ErrorKind {
    fn response_type(self) -> ResponseType {
        match self {
            Self::Client => ResponseType::ClientError,
            Self::Compile => ResponseType::CompileError,
            Self::Runtime => ResponseType::RuntimeError,
        }
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// A single result value; the query is complete.
    Atom(Value),
    /// The last batch of a stream; the query is complete.
    Sequence(Vec<Value>),
    /// A batch of a stream; a `CONTINUE` is needed for more.
    Partial(Vec<Value>),
    /// All `noreply` writes have completed.
    WaitComplete,
    /// Server information document.
    ServerInfo(Value),
    /// The query failed.
    Error {
        /// Error category.
        kind: ErrorKind,
        /// Human readable message.
        message: String,
        /// Term backtrace, if the server sent one.
        backtrace: Option<Value>,
    },
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Token of the query this response belongs to.
    pub token: Token,
    /// Decoded body.
    pub kind: ResponseKind,
    /// Query profile, when profiling was requested.
    pub profile: Option<Value>,
    /// Response notes (e.g. changefeed markers).
    pub notes: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawResponse {
    t: u64,
    #[serde(default)]
    r: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    b: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    n: Vec<u64>,
}

impl Response {
    /// Create a response with no profile or notes.
    #[must_use]
    pub fn new(token: Token, kind: ResponseKind) -> Self {
        Self {
            token,
            kind,
            profile: None,
            notes: Vec::new(),
        }
    }

    /// A `SUCCESS_PARTIAL` response.
    #[must_use]
    pub fn partial(token: Token, values: Vec<Value>) -> Self {
        Self::new(token, ResponseKind::Partial(values))
    }

    /// A `SUCCESS_SEQUENCE` response.
    #[must_use]
    pub fn sequence(token: Token, values: Vec<Value>) -> Self {
        Self::new(token, ResponseKind::Sequence(values))
    }

    /// A `SUCCESS_ATOM` response.
    #[must_use]
    pub fn atom(token: Token, value: Value) -> Self {
        Self::new(token, ResponseKind::Atom(value))
    }

    /// An error response.
    #[must_use]
    pub fn error(token: Token, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(
            token,
            ResponseKind::Error {
                kind,
                message: message.into(),
                backtrace: None,
            },
        )
    }

    /// Wire type of this response.
    #[must_use]
    pub fn response_type(&self) -> ResponseType {
        match &self.kind {
            ResponseKind::Atom(_) => ResponseType::SuccessAtom,
            ResponseKind::Sequence(_) => ResponseType::SuccessSequence,
            ResponseKind::Partial(_) => ResponseType::SuccessPartial,
            ResponseKind::WaitComplete => ResponseType::WaitComplete,
            ResponseKind::ServerInfo(_) => ResponseType::ServerInfo,
            ResponseKind::Error { kind, .. } => kind.response_type(),
        }
    }

    /// Whether more batches follow this one.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self.kind, ResponseKind::Partial(_))
    }

    /// Decode a response payload received under `token`.
    pub fn decode(token: Token, payload: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawResponse = serde_json::from_slice(payload)?;
        let response_type = ResponseType::from_code(raw.t)?;
        let mut results = raw.r;

        let kind = match response_type {
            ResponseType::SuccessAtom => ResponseKind::Atom(single(response_type, &mut results)?),
            ResponseType::SuccessSequence => ResponseKind::Sequence(results),
            ResponseType::SuccessPartial => ResponseKind::Partial(results),
            ResponseType::WaitComplete => ResponseKind::WaitComplete,
            ResponseType::ServerInfo => {
                ResponseKind::ServerInfo(single(response_type, &mut results)?)
            }
            ResponseType::ClientError
            | ResponseType::CompileError
            | ResponseType::RuntimeError => {
                let kind = match response_type {
                    ResponseType::ClientError => ErrorKind::Client,
                    ResponseType::CompileError => ErrorKind::Compile,
                    _ => ErrorKind::Runtime,
                };
                let message = match results.into_iter().next() {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::from("unknown server error"),
                };
                ResponseKind::Error {
                    kind,
                    message,
                    backtrace: raw.b,
                }
            }
        };

        Ok(Self {
            token,
            kind,
            profile: raw.p,
            notes: raw.n,
        })
    }

    /// Serialize the payload (without frame header).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let (r, b) = match &self.kind {
            ResponseKind::Atom(v) | ResponseKind::ServerInfo(v) => (vec![v.clone()], None),
            ResponseKind::Sequence(values) | ResponseKind::Partial(values) => {
                (values.clone(), None)
            }
            ResponseKind::WaitComplete => (Vec::new(), None),
            ResponseKind::Error {
                message, backtrace, ..
            } => (vec![Value::String(message.clone())], backtrace.clone()),
        };
        let raw = RawResponse {
            t: self.response_type() as u64,
            r,
            b,
            p: self.profile.clone(),
            n: self.notes.clone(),
        };
        serde_json::to_vec(&raw).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Serialize the complete frame.
    pub fn encode_frame(&self) -> Result<Bytes, ProtocolError> {
        encode_frame(self.token, &self.encode()?)
    }
}

fn single(response_type: ResponseType, results: &mut Vec<Value>) -> Result<Value, ProtocolError> {
    if results.len() != 1 {
        return Err(ProtocolError::Decode(format!(
            "{response_type:?} response carries {} values, expected 1",
            results.len()
        )));
    }
    Ok(results.remove(0))
}
