//! In-process server answering one mocked query.
//!
//! The server sits on the far end of a `tokio::io::duplex` pipe and speaks
//! the same frame codec as a live server. Every START or CONTINUE pulls the
//! next chunk set from the response program and answers with a `PARTIAL`
//! response. Once the program runs dry (or the client sends STOP) the query
//! is closed with an empty `SEQUENCE`.

use futures_util::{SinkExt, StreamExt};
use reql_codec::{CodecError, Frame, FrameStream};
use reql_protocol::{ErrorKind, QueryType, Response, ResponseKind, Token};
use serde_json::Value;
use tokio::io::DuplexStream;

use crate::mock::{SharedFeed, SharedGenerator};

/// Where the chunk sets for one execution come from.
pub(crate) enum ChunkSource {
    /// A single chunk set, handed out once.
    Once(Option<Vec<Value>>),
    Generator(SharedGenerator),
    Feed(SharedFeed),
}

impl ChunkSource {
    /// Next chunk set, or `None` at end of data.
    async fn next_chunk(&mut self) -> Option<Vec<Value>> {
        match self {
            Self::Once(chunk) => chunk.take(),
            Self::Generator(generator) => {
                let mut generate = generator.lock();
                (&mut *generate)()
            }
            Self::Feed(feed) => feed.lock().await.recv().await,
        }
    }
}

/// What happened while waiting on the response program.
enum Pulled {
    Chunk(Option<Vec<Value>>),
    Stopped(Token),
    Disconnected,
}

/// Spawn a server task for one execution and return the client end.
pub(crate) fn spawn(source: ChunkSource) -> DuplexStream {
    let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
    tokio::spawn(serve(server, source));
    client
}

const DUPLEX_CAPACITY: usize = 64 * 1024;

async fn serve(transport: DuplexStream, mut source: ChunkSource) {
    let mut stream = FrameStream::new(transport);
    let mut exhausted = false;

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "mock server read failed");
                return;
            }
        };
        let token = frame.token;

        let response = match QueryType::peek(&frame.payload) {
            Ok(QueryType::Start | QueryType::Continue) if exhausted => Response::sequence(token, Vec::new()),
            Ok(QueryType::Start | QueryType::Continue) => {
                // A client that already hung up must not consume a chunk.
                let pulled = tokio::select! {
                    biased;
                    interrupt = next_interrupt(&mut stream) => interrupt,
                    chunk = source.next_chunk() => Pulled::Chunk(chunk),
                };
                match pulled {
                    Pulled::Chunk(Some(values)) => Response::partial(token, values),
                    Pulled::Chunk(None) => {
                        exhausted = true;
                        Response::sequence(token, Vec::new())
                    }
                    Pulled::Stopped(stopped) => {
                        exhausted = true;
                        Response::sequence(stopped, Vec::new())
                    }
                    Pulled::Disconnected => return,
                }
            }
            Ok(QueryType::Stop) => {
                exhausted = true;
                Response::sequence(token, Vec::new())
            }
            Ok(QueryType::NoreplyWait) => Response::new(token, ResponseKind::WaitComplete),
            Err(e) => Response::error(token, ErrorKind::Client, e.to_string()),
        };

        tracing::trace!(
            token = %response.token,
            response_type = ?response.response_type(),
            "mock server responding"
        );
        if let Err(e) = send(&mut stream, &response).await {
            tracing::debug!(error = %e, "mock server write failed");
            return;
        }
    }
}

/// Watch the client while the response program blocks.
///
/// Resolves only on STOP or disconnect; anything else is ignored.
async fn next_interrupt(stream: &mut FrameStream<DuplexStream>) -> Pulled {
    loop {
        match stream.next().await {
            Some(Ok(frame)) => {
                if matches!(QueryType::peek(&frame.payload), Ok(QueryType::Stop)) {
                    return Pulled::Stopped(frame.token);
                }
            }
            Some(Err(_)) | None => return Pulled::Disconnected,
        }
    }
}

async fn send(stream: &mut FrameStream<DuplexStream>, response: &Response) -> Result<(), CodecError> {
    let payload = response.encode()?;
    stream.send(Frame::new(response.token, payload)).await
}
