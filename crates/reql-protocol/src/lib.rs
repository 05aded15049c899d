//! # reql-protocol
//!
//! Pure implementation of the ReQL wire protocol used by RethinkDB-compatible
//! servers.
//!
//! This crate provides the frame envelope, request tokens, query and response
//! payload types, and the term tree that queries are built from.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. Higher-level crates build upon
//! this foundation to provide async I/O capabilities.
//!
//! ## Wire Layout
//!
//! Every message in either direction is a single frame:
//!
//! ```text
//! +----------------+--------------+---------------------+
//! | token (u64 LE) | len (u32 LE) | payload (len bytes) |
//! +----------------+--------------+---------------------+
//! ```
//!
//! Request payloads are JSON arrays (`[type, term, options]`), response
//! payloads are JSON objects (`{"t": type, "r": [...]}`).
//!
//! ## Example
//!
//! ```rust,ignore
//! use reql_protocol::{Query, QueryOptions, Token, r};
//!
//! let term = r::table("users").get(5);
//! let query = Query::start(Token::new(1), term, QueryOptions::new());
//! let frame = query.encode_frame()?;
//! assert_eq!(&frame[..8], &1u64.to_le_bytes());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod frame;
pub mod query;
pub mod r;
pub mod response;
pub mod term;
pub mod token;

pub use error::ProtocolError;
pub use frame::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, FrameHeader, encode_frame};
pub use query::{Query, QueryOptions, QueryType};
pub use response::{ErrorKind, Response, ResponseKind, ResponseType};
pub use term::{Term, TermType, VarId, VarMapping};
pub use token::{Token, TokenAllocator};
