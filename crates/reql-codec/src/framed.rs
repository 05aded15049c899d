//! Framed streams for async I/O.
//!
//! This module provides both combined and split stream types:
//! - `FrameStream<T>` - Combined read/write stream, used by servers and tests
//! - `FrameReader<T>` - Read-only stream of incoming frames
//! - `FrameWriter<T>` - Write-only sink of outgoing frames
//!
//! A client connection uses the split types so that reading and writing
//! never wait on each other.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{Framed, FramedRead, FramedWrite};

use crate::error::CodecError;
use crate::frame_codec::{Frame, FrameCodec};

/// Split a transport into a frame reader and a frame writer.
///
/// Both halves use a copy of `codec`, so they share its frame size limit.
pub fn split<T>(
    transport: T,
    codec: FrameCodec,
) -> (FrameReader<ReadHalf<T>>, FrameWriter<WriteHalf<T>>)
where
    T: AsyncRead + AsyncWrite,
{
    let (read_half, write_half) = tokio::io::split(transport);
    (
        FrameReader::with_codec(read_half, codec.clone()),
        FrameWriter::with_codec(write_half, codec),
    )
}

pin_project! {
    /// A framed stream over a bidirectional transport.
    pub struct FrameStream<T> {
        #[pin]
        inner: Framed<T, FrameCodec>,
    }
}

impl<T> FrameStream<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Frame `transport` with the default codec.
    pub fn new(transport: T) -> Self {
        Self {
            inner: Framed::new(transport, FrameCodec::new()),
        }
    }
}

impl<T> Stream for FrameStream<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Frame, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> Sink<Frame> for FrameStream<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for FrameStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("codec", self.inner.codec())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// A read-only stream of incoming frames.
    pub struct FrameReader<T> {
        #[pin]
        inner: FramedRead<T, FrameCodec>,
    }
}

impl<T> FrameReader<T>
where
    T: AsyncRead,
{
    /// Create a frame reader using `codec`.
    pub fn with_codec(transport: T, codec: FrameCodec) -> Self {
        Self {
            inner: FramedRead::new(transport, codec),
        }
    }
}

impl<T> Stream for FrameReader<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Frame, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for FrameReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("buffered", &self.inner.read_buffer().len())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// A write-only sink of outgoing frames.
    pub struct FrameWriter<T> {
        #[pin]
        inner: FramedWrite<T, FrameCodec>,
    }
}

impl<T> FrameWriter<T>
where
    T: AsyncWrite,
{
    /// Create a frame writer using `codec`.
    pub fn with_codec(transport: T, codec: FrameCodec) -> Self {
        Self {
            inner: FramedWrite::new(transport, codec),
        }
    }
}

impl<T> Sink<Frame> for FrameWriter<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for FrameWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("codec", self.inner.encoder())
            .finish_non_exhaustive()
    }
}
