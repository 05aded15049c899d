//! Multiplexed connection with split reader and processor loops.
//!
//! A connection owns one duplex byte stream and serves any number of
//! concurrently outstanding queries over it. Each query is tagged with a
//! token from the connection's own allocator; responses are routed back to
//! the cursor registered under that token.
//!
//! ```text
//!              ┌──────────────┐  frames  ┌────────────────┐
//!  transport ─▶│ reader loop  │─────────▶│ processor loop │─▶ cursor buffers
//!              └──────────────┘  (mpsc)  └────────────────┘
//!                     ▲
//!  query / continue / stop ── FrameWriter (tokio Mutex) ──▶ transport
//! ```
//!
//! The reader never touches the token map; it only hands frames to the
//! processor. The token map lock is held for single map operations and never
//! across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reql_codec::{Frame, FrameCodec, FrameReader, FrameWriter};
use reql_protocol::{Query, QueryOptions, Response, Term, Token, TokenAllocator, r};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::config::ConnectOpts;
use crate::cursor::{Cursor, CursorState};
use crate::error::{Error, Result};

/// A byte stream a connection can run over.
///
/// Implemented for every `AsyncRead + AsyncWrite` type that can be moved to
/// another task, such as `TcpStream` or `tokio::io::DuplexStream`.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxedTransport = Box<dyn Transport>;

/// Message from the reader loop to the processor loop.
enum Handoff {
    Frame(Frame),
    Failed(Error),
}

struct Shared {
    writer: tokio::sync::Mutex<FrameWriter<WriteHalf<BoxedTransport>>>,
    cursors: Mutex<HashMap<Token, Arc<CursorState>>>,
    tokens: TokenAllocator,
    closed: AtomicBool,
    write_closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    database: Option<String>,
}

impl Shared {
    /// Mark the connection closed and fail every open cursor with `err`.
    ///
    /// Returns `false` if the connection was already closed.
    fn shut_down(&self, err: Error) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown.send_replace(true);

        let open: Vec<_> = self.cursors.lock().drain().collect();
        tracing::debug!(open_cursors = open.len(), error = %err, "connection shut down");
        for (_, state) in open {
            state.fail(err.clone());
        }
        true
    }

    /// Shut down the write half so the peer reads end of stream.
    async fn close_writer(&self) {
        if self.write_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            tracing::debug!(error = %e, "error shutting down write half");
        }
    }

    fn route(&self, frame: Frame) {
        let token = frame.token;
        let Some(state) = self.cursors.lock().get(&token).cloned() else {
            tracing::trace!(token = %token, "discarding response for unknown token");
            return;
        };

        match Response::decode(token, &frame.payload) {
            Ok(response) => {
                tracing::trace!(
                    token = %token,
                    response_type = ?response.response_type(),
                    "routing response"
                );
                if !response.is_partial() {
                    self.cursors.lock().remove(&token);
                }
                state.deliver(response);
            }
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "failed to decode response");
                self.cursors.lock().remove(&token);
                state.fail(e.into());
            }
        }
    }
}

/// A multiplexed connection.
///
/// Cloning is cheap and yields another handle to the same connection. The
/// background loops stop when the connection is closed, when the transport
/// fails, or when the last handle (including handles held by cursors) is
/// dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Open a connection over an established transport.
    ///
    /// Spawns the reader and processor tasks on the current tokio runtime
    /// and returns immediately. No handshake is performed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn open<T>(transport: T, opts: ConnectOpts) -> Self
    where
        T: Transport,
    {
        let codec = FrameCodec::new().with_max_frame_size(opts.max_frame_size);
        let (reader, writer) = reql_codec::split(Box::new(transport) as BoxedTransport, codec);
        let (handoff_tx, handoff_rx) = mpsc::channel(opts.handoff_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(writer),
            cursors: Mutex::new(HashMap::new()),
            tokens: TokenAllocator::new(),
            closed: AtomicBool::new(false),
            write_closed: AtomicBool::new(false),
            shutdown,
            database: opts.database,
        });

        tokio::spawn(read_loop(reader, handoff_tx, shutdown_rx));
        tokio::spawn(process_loop(Arc::downgrade(&shared), handoff_rx));

        tracing::debug!("connection opened");
        Self { shared }
    }

    /// Connect to `opts.address` over TCP and open a connection.
    pub async fn dial(opts: ConnectOpts) -> Result<Self> {
        opts.validate()?;
        tracing::info!(
            address = %opts.address,
            database = ?opts.database,
            "connecting to ReQL server"
        );

        let stream = timeout(opts.connect_timeout, TcpStream::connect(&opts.address))
            .await
            .map_err(|_| Error::ConnectTimeout)??;
        stream.set_nodelay(true)?;

        Ok(Self::open(stream, opts))
    }

    /// Start a query and return the cursor that receives its results.
    ///
    /// The cursor is registered before the query is written, so a response
    /// can never arrive ahead of it. With the `noreply` option the query is
    /// written without registering a cursor and the returned cursor is
    /// already finished.
    pub async fn query(&self, term: Term, options: QueryOptions) -> Result<Cursor> {
        self.start(term, options, false).await
    }

    /// Start a query on a connection dedicated to it.
    ///
    /// The connection is closed as soon as the returned cursor is exhausted,
    /// closed or dropped.
    pub async fn query_exclusive(self, term: Term, options: QueryOptions) -> Result<Cursor> {
        self.start(term, options, true).await
    }

    async fn start(&self, term: Term, mut options: QueryOptions, exclusive: bool) -> Result<Cursor> {
        self.ensure_open()?;

        if let Some(db) = &self.shared.database {
            if !options.contains("db") {
                options.insert("db", r::db(db.clone()));
            }
        }

        let token = self.shared.tokens.next_token();
        let noreply = options.is_noreply();
        let query = Query::start(token, term.clone(), options);

        if noreply {
            self.write(&query).await?;
            tracing::debug!(token = %token, "noreply query written");
            return Ok(Cursor::new(
                self.clone(),
                token,
                term,
                Arc::new(CursorState::finished()),
                exclusive,
            ));
        }

        let state = self.register(token)?;
        if let Err(e) = self.write(&query).await {
            self.deregister(token);
            return Err(e);
        }

        tracing::debug!(token = %token, term = %term, "query started");
        Ok(Cursor::new(self.clone(), token, term, state, exclusive))
    }

    /// Request the next batch for an open query.
    pub async fn continue_query(&self, token: Token) -> Result<()> {
        self.ensure_open()?;
        if !self.shared.cursors.lock().contains_key(&token) {
            return Err(Error::UnknownToken(token));
        }
        tracing::trace!(token = %token, "requesting continuation");
        self.write(&Query::continuation(token)).await
    }

    /// Ask the server to stop an open query.
    ///
    /// Best effort: on a closed connection this does nothing.
    pub async fn stop(&self, token: Token) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        tracing::trace!(token = %token, "stopping query");
        self.write(&Query::stop(token)).await
    }

    /// Wait until the server has applied every `noreply` query sent so far.
    pub async fn noreply_wait(&self) -> Result<()> {
        self.ensure_open()?;
        let token = self.shared.tokens.next_token();
        let state = self.register(token)?;
        if let Err(e) = self.write(&Query::noreply_wait(token)).await {
            self.deregister(token);
            return Err(e);
        }

        let mut cursor = Cursor::new(self.clone(), token, Term::Anything, state, false);
        while cursor.next().await?.is_some() {}
        Ok(())
    }

    /// Close the connection.
    ///
    /// Every open cursor fails with [`Error::ConnectionClosed`] on its next
    /// read. Calling this more than once is harmless.
    pub async fn close(&self) {
        self.shared.shut_down(Error::ConnectionClosed);
        self.shared.close_writer().await;
    }

    /// Close without waiting for the write half to shut down.
    ///
    /// The shutdown itself runs on a spawned task when a runtime is
    /// available, so the peer still sees end of stream.
    pub(crate) fn release(&self) {
        if !self.shared.shut_down(Error::ConnectionClosed) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            handle.spawn(async move { shared.close_writer().await });
        }
    }

    /// Check if the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of queries awaiting responses.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.shared.cursors.lock().len()
    }

    /// The token the next query will use.
    #[must_use]
    pub fn next_token(&self) -> Token {
        self.shared.tokens.peek()
    }

    pub(crate) fn deregister(&self, token: Token) {
        self.shared.cursors.lock().remove(&token);
    }

    fn register(&self, token: Token) -> Result<Arc<CursorState>> {
        let state = Arc::new(CursorState::new());
        self.shared.cursors.lock().insert(token, Arc::clone(&state));

        // A close that raced the insert may already have drained the map.
        if self.is_closed() {
            self.deregister(token);
            return Err(Error::ConnectionClosed);
        }
        Ok(state)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    async fn write(&self, query: &Query) -> Result<()> {
        let frame = Frame::new(query.token, query.payload()?);
        let mut writer = self.shared.writer.lock().await;
        match writer.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = Error::from(e);
                if err.is_fatal_to_connection() {
                    drop(writer);
                    tracing::warn!(error = %err, "write failed, closing connection");
                    self.shared.shut_down(err.clone());
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("open_cursors", &self.open_cursors())
            .field("next_token", &self.next_token())
            .finish()
    }
}

async fn read_loop(
    mut reader: FrameReader<ReadHalf<BoxedTransport>>,
    handoff: mpsc::Sender<Handoff>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let item = tokio::select! {
            _ = shutdown.changed() => break,
            item = reader.next() => item,
        };

        let (message, last) = match item {
            Some(Ok(frame)) => {
                tracing::trace!(token = %frame.token, length = frame.payload.len(), "frame received");
                (Handoff::Frame(frame), false)
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "transport read failed");
                (Handoff::Failed(e.into()), true)
            }
            None => {
                tracing::debug!("transport reached end of stream");
                break;
            }
        };

        if handoff.send(message).await.is_err() || last {
            break;
        }
    }
}

async fn process_loop(shared: Weak<Shared>, mut handoff: mpsc::Receiver<Handoff>) {
    while let Some(message) = handoff.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match message {
            Handoff::Frame(frame) => shared.route(frame),
            Handoff::Failed(err) => {
                shared.shut_down(err);
                return;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.shut_down(Error::ConnectionClosed);
    }
}
