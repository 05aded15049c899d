//! Query dispatch.
//!
//! [`QueryExecutor`] is the seam between code that runs queries and the
//! thing that executes them. A [`Connection`] executes queries against a
//! server; a mock executor can stand in for it in tests without the calling
//! code changing.
//!
//! ```rust,ignore
//! use reql_client::{Connection, RunExt};
//! use reql_protocol::r;
//!
//! let conn = Connection::dial(ConnectOpts::new()).await?;
//! let users = r::table("users").run(&conn).await?.all().await?;
//! ```

use async_trait::async_trait;
use reql_protocol::{QueryOptions, Term};

use crate::connection::Connection;
use crate::cursor::Cursor;
use crate::error::Result;

/// Anything that can execute a query and hand back a cursor.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Check if the executor can accept queries.
    fn is_connected(&self) -> bool;

    /// Start a query and return its cursor without waiting for a response.
    async fn query(&self, term: Term, options: QueryOptions) -> Result<Cursor>;

    /// Run a query for its side effects.
    ///
    /// Waits for the first response, surfacing any query error, then closes
    /// the cursor.
    async fn exec(&self, term: Term, options: QueryOptions) -> Result<()> {
        let mut cursor = self.query(term, options).await?;
        cursor.prime().await?;
        cursor.close().await
    }
}

#[async_trait]
impl QueryExecutor for Connection {
    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    async fn query(&self, term: Term, options: QueryOptions) -> Result<Cursor> {
        Connection::query(self, term, options).await
    }
}

/// Run a query and return its cursor once the first response has arrived.
///
/// Errors reported for the query before any data (compile errors, runtime
/// errors, mocked errors) are returned here rather than from the cursor.
pub async fn run(term: Term, options: QueryOptions, executor: &dyn QueryExecutor) -> Result<Cursor> {
    tracing::trace!(term = %term, "running query");
    let mut cursor = executor.query(term, options).await?;
    cursor.prime().await?;
    Ok(cursor)
}

/// Run a query for its side effects.
pub async fn exec(term: Term, options: QueryOptions, executor: &dyn QueryExecutor) -> Result<()> {
    tracing::trace!(term = %term, "executing query");
    executor.exec(term, options).await
}

/// Method-style dispatch on terms.
#[async_trait]
pub trait RunExt {
    /// Run with default options.
    async fn run(self, executor: &dyn QueryExecutor) -> Result<Cursor>;

    /// Run with the given options.
    async fn run_with(self, options: QueryOptions, executor: &dyn QueryExecutor) -> Result<Cursor>;

    /// Execute with default options, discarding the results.
    async fn exec(self, executor: &dyn QueryExecutor) -> Result<()>;

    /// Execute with the given options, discarding the results.
    async fn exec_with(self, options: QueryOptions, executor: &dyn QueryExecutor) -> Result<()>;
}

#[async_trait]
impl RunExt for Term {
    async fn run(self, executor: &dyn QueryExecutor) -> Result<Cursor> {
        run(self, QueryOptions::new(), executor).await
    }

    async fn run_with(self, options: QueryOptions, executor: &dyn QueryExecutor) -> Result<Cursor> {
        run(self, options, executor).await
    }

    async fn exec(self, executor: &dyn QueryExecutor) -> Result<()> {
        exec(self, QueryOptions::new(), executor).await
    }

    async fn exec_with(self, options: QueryOptions, executor: &dyn QueryExecutor) -> Result<()> {
        exec(self, options, executor).await
    }
}
