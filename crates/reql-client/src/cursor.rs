//! Pull-based result cursor.
//!
//! A cursor buffers the values of one query as the processor loop delivers
//! them and hands them out one at a time. When the buffer runs dry and the
//! server has more, the cursor asks for the next batch itself, keeping at
//! most one continuation in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_core::Stream;
use parking_lot::Mutex;
use reql_protocol::{Response, ResponseKind, Term, Token};
use serde_json::Value;
use tokio::sync::Notify;

use crate::connection::Connection;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct CursorInner {
    buffer: VecDeque<Value>,
    /// The server sent a terminal response (or the query failed).
    server_done: bool,
    /// A request for the next batch is outstanding.
    fetching: bool,
    /// Closed locally; late deliveries are ignored.
    closed: bool,
    is_atom: bool,
    error: Option<Error>,
    profile: Option<Value>,
}

/// State shared between a cursor and the processor loop.
#[derive(Debug)]
pub(crate) struct CursorState {
    inner: Mutex<CursorInner>,
    notify: Notify,
}

impl CursorState {
    /// State for a query whose start frame is in flight.
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(CursorInner {
                fetching: true,
                ..CursorInner::default()
            }),
            notify: Notify::new(),
        }
    }

    /// State for a query that will never receive a response.
    pub(crate) fn finished() -> Self {
        Self {
            inner: Mutex::new(CursorInner {
                server_done: true,
                ..CursorInner::default()
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn deliver(&self, response: Response) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.fetching = false;
            if response.profile.is_some() {
                inner.profile = response.profile;
            }
            match response.kind {
                ResponseKind::Partial(values) => inner.buffer.extend(values),
                ResponseKind::Sequence(values) => {
                    inner.buffer.extend(values);
                    inner.server_done = true;
                }
                ResponseKind::Atom(value) | ResponseKind::ServerInfo(value) => {
                    inner.buffer.push_back(value);
                    inner.is_atom = true;
                    inner.server_done = true;
                }
                ResponseKind::WaitComplete => inner.server_done = true,
                ResponseKind::Error { kind, message, .. } => {
                    inner.error = Some(Error::Server { kind, message });
                    inner.server_done = true;
                }
            }
        }
        self.notify.notify_one();
    }

    pub(crate) fn fail(&self, err: Error) {
        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.server_done {
                return;
            }
            inner.fetching = false;
            inner.server_done = true;
            inner.error = Some(err);
        }
        self.notify.notify_one();
    }
}

/// What `next()` should do after inspecting the state.
enum Step {
    Yield(Option<Value>),
    Fail(Error),
    Fetch,
    Wait,
}

/// Handle over the (possibly chunked) results of one query.
///
/// Values are yielded in the order the server produced them. Dropping a
/// cursor that has not been exhausted stops the query on the server and
/// frees its token.
pub struct Cursor {
    conn: Connection,
    token: Token,
    term: Term,
    state: Arc<CursorState>,
    exclusive: bool,
}

impl Cursor {
    pub(crate) fn new(
        conn: Connection,
        token: Token,
        term: Term,
        state: Arc<CursorState>,
        exclusive: bool,
    ) -> Self {
        Self {
            conn,
            token,
            term,
            state,
            exclusive,
        }
    }

    /// Token of the query this cursor reads.
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// The query term.
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.term
    }

    /// Check if the result is a single value rather than a stream.
    #[must_use]
    pub fn is_atom(&self) -> bool {
        self.state.inner.lock().is_atom
    }

    /// Check if every value has been handed out (or the cursor was closed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let inner = self.state.inner.lock();
        inner.closed || (inner.server_done && inner.buffer.is_empty() && inner.error.is_none())
    }

    /// Number of values buffered and not yet handed out.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.state.inner.lock().buffer.len()
    }

    /// Query profile, if the query was run with profiling enabled.
    #[must_use]
    pub fn profile(&self) -> Option<Value> {
        self.state.inner.lock().profile.clone()
    }

    /// Get the next value.
    ///
    /// Returns `Ok(None)` once the results are exhausted. An error is
    /// returned once, after any values buffered before it; the cursor is
    /// closed afterwards.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        loop {
            match self.step() {
                Step::Yield(Some(value)) => return Ok(Some(value)),
                Step::Yield(None) => {
                    self.finish();
                    return Ok(None);
                }
                Step::Fail(err) => {
                    self.finish();
                    return Err(err);
                }
                Step::Fetch => {
                    if let Err(err) = self.conn.continue_query(self.token).await {
                        {
                            let mut inner = self.state.inner.lock();
                            inner.closed = true;
                            inner.error = None;
                        }
                        self.finish();
                        return Err(err);
                    }
                }
                Step::Wait => {}
            }
            self.state.notify.notified().await;
        }
    }

    fn step(&self) -> Step {
        let mut inner = self.state.inner.lock();
        if let Some(value) = inner.buffer.pop_front() {
            return Step::Yield(Some(value));
        }
        if let Some(err) = inner.error.take() {
            inner.closed = true;
            return Step::Fail(err);
        }
        if inner.server_done || inner.closed {
            inner.closed = true;
            return Step::Yield(None);
        }
        if inner.fetching {
            return Step::Wait;
        }
        inner.fetching = true;
        Step::Fetch
    }

    /// Wait for the first response without consuming any value.
    ///
    /// Surfaces a query error that arrived before any data.
    pub(crate) async fn prime(&mut self) -> Result<()> {
        loop {
            {
                let mut inner = self.state.inner.lock();
                if !inner.buffer.is_empty() || inner.closed {
                    return Ok(());
                }
                if let Some(err) = inner.error.take() {
                    inner.closed = true;
                    drop(inner);
                    self.finish();
                    return Err(err);
                }
                if inner.server_done || !inner.fetching {
                    return Ok(());
                }
            }
            self.state.notify.notified().await;
        }
    }

    /// Collect every remaining value.
    pub async fn all(&mut self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        while let Some(value) = self.next().await? {
            values.push(value);
        }
        Ok(values)
    }

    /// Take the first value and close the cursor.
    ///
    /// Fails with [`Error::EmptyResult`] if the query produced nothing.
    pub async fn one(&mut self) -> Result<Value> {
        let first = self.next().await?;
        self.close().await?;
        first.ok_or(Error::EmptyResult)
    }

    /// Convert into a stream of values.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send {
        futures_util::stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(value)) => Some((Ok(value), cursor)),
                Ok(None) => None,
                Err(err) => Some((Err(err), cursor)),
            }
        })
    }

    /// Close the cursor.
    ///
    /// Buffered values are discarded. If the server had not finished the
    /// query it is asked to stop; a cursor from
    /// [`Connection::query_exclusive`] closes its connection instead. Calling
    /// this more than once is harmless.
    pub async fn close(&mut self) -> Result<()> {
        let server_done = {
            let mut inner = self.state.inner.lock();
            if inner.closed {
                drop(inner);
                self.release();
                return Ok(());
            }
            inner.closed = true;
            inner.buffer.clear();
            inner.error = None;
            inner.server_done
        };

        self.conn.deregister(self.token);
        let result = if self.exclusive {
            self.conn.close().await;
            Ok(())
        } else if server_done {
            Ok(())
        } else {
            self.conn.stop(self.token).await
        };

        tracing::debug!(token = %self.token, "cursor closed");
        self.release();
        result
    }

    /// Local bookkeeping once the consumer is done with the cursor.
    fn finish(&self) {
        self.conn.deregister(self.token);
        self.release();
    }

    fn release(&self) {
        if self.exclusive {
            self.conn.release();
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        let needs_stop = {
            let mut inner = self.state.inner.lock();
            let needs_stop = !inner.closed && !inner.server_done;
            inner.closed = true;
            inner.buffer.clear();
            needs_stop
        };

        if needs_stop {
            self.conn.deregister(self.token);
            if !self.exclusive {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let conn = self.conn.clone();
                    let token = self.token;
                    handle.spawn(async move {
                        if let Err(e) = conn.stop(token).await {
                            tracing::debug!(token = %token, error = %e, "stop after drop failed");
                        }
                    });
                }
            }
        }
        self.release();
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("token", &self.token)
            .field("term", &self.term.to_string())
            .field("buffered", &self.buffered())
            .field("finished", &self.is_finished())
            .finish()
    }
}
