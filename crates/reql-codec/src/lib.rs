//! # reql-codec
//!
//! Async framing layer for ReQL frames.
//!
//! This crate turns a raw byte stream into a stream of [`Frame`]s and back,
//! handling frames split across TCP segments and several frames arriving in
//! one read.
//!
//! ## Architecture
//!
//! ```text
//! TCP Stream → FrameCodec (header + payload) → FrameReader / FrameWriter → Connection
//! ```
//!
//! ### Split I/O
//!
//! [`split`] divides a transport into independent read and write halves so
//! that one task can block on the next incoming frame while other tasks keep
//! writing queries.
//!
//! ```rust,ignore
//! use futures_util::{SinkExt, StreamExt};
//! use reql_codec::{Frame, FrameCodec, split};
//!
//! let (mut reader, mut writer) = split(tcp_stream, FrameCodec::new());
//! writer.send(Frame::new(token, payload)).await?;
//! let reply = reader.next().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod frame_codec;
pub mod framed;

pub use error::CodecError;
pub use frame_codec::{Frame, FrameCodec};
pub use framed::{FrameReader, FrameStream, FrameWriter, split};
