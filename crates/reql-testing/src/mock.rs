//! Query expectation registry.
//!
//! A [`Mock`] keeps an ordered list of expected queries. Each incoming query
//! is compared against them in registration order; the first live match
//! decides the response. Every call is recorded in an append-only execution
//! log that the assertion methods inspect afterwards.
//!
//! The registry lock is held only while scanning or appending. Wait gates,
//! generators and feeds all run with the lock released, so concurrent
//! executions never serialize on the mock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reql_client::{ConnectOpts, Connection, Cursor, Error, QueryExecutor, Result};
use reql_protocol::{QueryOptions, Term, VarMapping, r};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::server::{self, ChunkSource};

/// Pull-based generator shared by every execution of an expectation.
pub type SharedGenerator = Arc<Mutex<Box<dyn FnMut() -> Option<Vec<Value>> + Send>>>;

/// Receiving end of a [`MockFeed`], shared by every execution of an
/// expectation.
pub type SharedFeed = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<Value>>>>;

/// How a matched query is answered.
#[derive(Clone)]
pub enum MockResponse {
    /// A static value. Arrays are sent as one chunk of their elements, any
    /// other value as a one-value chunk.
    Value(Value),
    /// A generator called for each chunk set until it returns `None`.
    Generator(SharedGenerator),
    /// A feed the test pushes chunk sets into; see [`MockFeed`].
    Feed(SharedFeed),
}

impl MockResponse {
    /// Respond with a static value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// Respond with chunk sets produced by `generate`.
    ///
    /// The generator is shared by every execution of the expectation.
    pub fn generator<F>(generate: F) -> Self
    where
        F: FnMut() -> Option<Vec<Value>> + Send + 'static,
    {
        Self::Generator(Arc::new(Mutex::new(Box::new(generate))))
    }

    /// Respond with the given chunk sets, one per batch.
    pub fn chunks(chunks: Vec<Vec<Value>>) -> Self {
        let mut chunks = chunks.into_iter();
        Self::generator(move || chunks.next())
    }

    /// Respond with chunk sets pushed through the returned [`MockFeed`].
    ///
    /// Reads block until a chunk set is pushed; closing the feed ends the
    /// stream.
    #[must_use]
    pub fn feed() -> (MockFeed, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = MockFeed {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (feed, Self::Feed(Arc::new(tokio::sync::Mutex::new(rx))))
    }

    fn source(&self) -> ChunkSource {
        match self {
            Self::Value(Value::Array(items)) => ChunkSource::Once(Some(items.clone())),
            Self::Value(value) => ChunkSource::Once(Some(vec![value.clone()])),
            Self::Generator(generator) => ChunkSource::Generator(Arc::clone(generator)),
            Self::Feed(feed) => ChunkSource::Feed(Arc::clone(feed)),
        }
    }
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::Value(Value::Array(Vec::new()))
    }
}

impl From<Value> for MockResponse {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
            Self::Feed(_) => f.write_str("Feed(..)"),
        }
    }
}

/// Push side of a [`MockResponse::Feed`].
#[derive(Debug, Clone)]
pub struct MockFeed {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<Value>>>>>,
}

impl MockFeed {
    /// Push the next chunk set.
    ///
    /// Returns `false` if the feed was closed.
    pub fn push(&self, chunk: Vec<Value>) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(chunk).is_ok())
    }

    /// End the stream. Chunk sets already pushed are still delivered.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

/// How many more executions an expectation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repeat {
    Unlimited,
    Remaining(u32),
    Exhausted,
}

/// What a matched execution waits for before responding.
#[derive(Debug, Clone)]
enum Gate {
    After(Duration),
    Until(watch::Receiver<bool>),
}

impl Gate {
    async fn wait(self) {
        match self {
            Self::After(delay) => tokio::time::sleep(delay).await,
            Self::Until(mut rx) => {
                if rx.wait_for(|open| *open).await.is_err() {
                    tracing::debug!("wait gate sender dropped, releasing query");
                }
            }
        }
    }
}

#[derive(Debug)]
struct Expectation {
    term: Term,
    options: QueryOptions,
    response: MockResponse,
    error: Option<Error>,
    repeat: Repeat,
    gate: Option<Gate>,
    executed: usize,
}

impl Expectation {
    fn matches(&self, term: &Term, options: &QueryOptions) -> bool {
        structurally_equal(&self.term, &self.options, term, options)
    }
}

fn structurally_equal(
    expected_term: &Term,
    expected_options: &QueryOptions,
    term: &Term,
    options: &QueryOptions,
) -> bool {
    let mut vars = VarMapping::default();
    expected_term.matches_with(term, &mut vars) && expected_options.matches_with(options, &mut vars)
}

/// Everything needed to answer a matched query once the lock is released.
struct Plan {
    response: MockResponse,
    error: Option<Error>,
    gate: Option<Gate>,
}

/// Result of one call into the mock.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// A cursor was returned.
    Returned,
    /// The expectation's configured error was returned, or the synthetic
    /// connection failed.
    Failed(Error),
    /// No live expectation matched.
    Unexpected,
}

/// One entry of the execution log.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// The query term as executed.
    pub term: Term,
    /// The query options as executed.
    pub options: QueryOptions,
    /// How the call ended.
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Default)]
struct Registry {
    expectations: Vec<Expectation>,
    log: Vec<ExecutionRecord>,
}

/// Failed mock assertion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AssertionFailure {
    /// Some expectations were never executed or still expect more executions.
    #[error(
        "FAIL: {met} out of {total} expectation(s) were met.\n\tThe query you are testing needs to be executed {unmet} more times(s).{}",
        list_queries(.queries)
    )]
    ExpectationsUnmet {
        /// Expectations that were satisfied.
        met: usize,
        /// Expectations registered.
        total: usize,
        /// Expectations that were not satisfied.
        unmet: usize,
        /// The unsatisfied queries.
        queries: Vec<String>,
    },

    /// The query ran a different number of times than asserted.
    #[error(
        "Expected number of executions ({expected}) does not match the actual number of executions ({actual})."
    )]
    ExecutionCount {
        /// Asserted executions.
        expected: usize,
        /// Recorded executions.
        actual: usize,
    },

    /// The query was asserted to have run but did not.
    #[error("The query \"{query}\" should have been executed, but was not.")]
    NotExecuted {
        /// The query.
        query: String,
    },

    /// The query was asserted not to have run but did.
    #[error("The query \"{query}\" was executed, but should NOT have been.")]
    Executed {
        /// The query.
        query: String,
    },
}

fn list_queries(queries: &[String]) -> String {
    queries.iter().map(|q| format!("\n\t\u{274c}\t{q}")).collect()
}

/// A drop-in [`QueryExecutor`] answering queries from registered
/// expectations.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct Mock {
    registry: Arc<Mutex<Registry>>,
    opts: ConnectOpts,
}

impl Mock {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty mock that behaves like a connection opened with
    /// `opts`.
    ///
    /// A default database in `opts` is added as the `db` option of every
    /// expected and incoming query that does not name one, the same way a
    /// live connection fills it in.
    #[must_use]
    pub fn with_opts(opts: ConnectOpts) -> Self {
        Self {
            registry: Arc::default(),
            opts,
        }
    }

    /// Expect `term` run with no options.
    ///
    /// The expectation answers with an empty result and accepts any number
    /// of executions until configured otherwise.
    pub fn on(&self, term: impl Into<Term>) -> MockQuery {
        self.on_with_options(term, QueryOptions::new())
    }

    /// Expect `term` run with exactly `options`.
    pub fn on_with_options(&self, term: impl Into<Term>, options: QueryOptions) -> MockQuery {
        let options = self.with_default_db(options);
        let mut registry = self.registry.lock();
        registry.expectations.push(Expectation {
            term: term.into(),
            options,
            response: MockResponse::default(),
            error: None,
            repeat: Repeat::Unlimited,
            gate: None,
            executed: 0,
        });
        MockQuery {
            mock: self.clone(),
            index: registry.expectations.len() - 1,
        }
    }

    /// Snapshot of the execution log, in completion order.
    #[must_use]
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.registry.lock().log.clone()
    }

    /// Number of recorded executions structurally matching `query`.
    ///
    /// Calls that matched no expectation are not counted.
    #[must_use]
    pub fn execution_count(&self, query: &MockQuery) -> usize {
        let registry = self.registry.lock();
        let Some(expected) = registry.expectations.get(query.index) else {
            return 0;
        };
        registry
            .log
            .iter()
            .filter(|record| !matches!(record.outcome, ExecutionOutcome::Unexpected))
            .filter(|record| expected.matches(&record.term, &record.options))
            .count()
    }

    /// Check every expectation was executed and its repeat count used up.
    ///
    /// Reports all unmet expectations at once.
    pub fn assert_expectations(&self) -> std::result::Result<(), AssertionFailure> {
        let registry = self.registry.lock();
        let total = registry.expectations.len();
        let mut queries = Vec::new();

        for expectation in &registry.expectations {
            let executed = expectation.executed > 0
                || registry
                    .log
                    .iter()
                    .any(|record| expectation.matches(&record.term, &record.options));
            let satisfied = executed && !matches!(expectation.repeat, Repeat::Remaining(_));
            if satisfied {
                tracing::debug!(term = %expectation.term, "expectation met");
            } else {
                queries.push(expectation.term.to_string());
            }
        }

        if queries.is_empty() {
            return Ok(());
        }
        Err(AssertionFailure::ExpectationsUnmet {
            met: total - queries.len(),
            total,
            unmet: queries.len(),
            queries,
        })
    }

    /// Check `query` was executed exactly `expected` times.
    pub fn assert_number_of_executions(
        &self,
        query: &MockQuery,
        expected: usize,
    ) -> std::result::Result<(), AssertionFailure> {
        let actual = self.execution_count(query);
        if actual == expected {
            Ok(())
        } else {
            Err(AssertionFailure::ExecutionCount { expected, actual })
        }
    }

    /// Check `query` was executed at least once.
    pub fn assert_executed(&self, query: &MockQuery) -> std::result::Result<(), AssertionFailure> {
        if self.execution_count(query) > 0 {
            Ok(())
        } else {
            Err(AssertionFailure::NotExecuted {
                query: query.term().to_string(),
            })
        }
    }

    /// Check `query` was never executed.
    pub fn assert_not_executed(&self, query: &MockQuery) -> std::result::Result<(), AssertionFailure> {
        if self.execution_count(query) == 0 {
            Ok(())
        } else {
            Err(AssertionFailure::Executed {
                query: query.term().to_string(),
            })
        }
    }

    /// Find the first live expectation matching the query and consume one
    /// execution from it.
    fn claim(&self, term: &Term, options: &QueryOptions) -> Option<Plan> {
        let mut registry = self.registry.lock();
        let expectation = registry
            .expectations
            .iter_mut()
            .find(|e| e.repeat != Repeat::Exhausted && e.matches(term, options))?;

        expectation.executed += 1;
        expectation.repeat = match expectation.repeat {
            Repeat::Remaining(n) if n > 1 => Repeat::Remaining(n - 1),
            Repeat::Remaining(_) => Repeat::Exhausted,
            other => other,
        };

        Some(Plan {
            response: expectation.response.clone(),
            error: expectation.error.clone(),
            gate: expectation.gate.clone(),
        })
    }

    fn with_default_db(&self, mut options: QueryOptions) -> QueryOptions {
        if let Some(db) = &self.opts.database {
            if !options.contains("db") {
                options.insert("db", r::db(db.clone()));
            }
        }
        options
    }

    fn record(&self, term: Term, options: QueryOptions, outcome: ExecutionOutcome) {
        self.registry.lock().log.push(ExecutionRecord {
            term,
            options,
            outcome,
        });
    }

    fn configure(&self, index: usize, apply: impl FnOnce(&mut Expectation)) {
        if let Some(expectation) = self.registry.lock().expectations.get_mut(index) {
            apply(expectation);
        }
    }
}

#[async_trait]
impl QueryExecutor for Mock {
    fn is_connected(&self) -> bool {
        true
    }

    async fn query(&self, term: Term, options: QueryOptions) -> Result<Cursor> {
        let options = self.with_default_db(options);
        let Some(plan) = self.claim(&term, &options) else {
            tracing::error!(term = %term, "mock: this query was unexpected");
            let err = Error::UnexpectedQuery(term.to_string());
            self.record(term, options, ExecutionOutcome::Unexpected);
            return Err(err);
        };

        if let Some(gate) = plan.gate {
            gate.wait().await;
        }

        let result = match plan.error {
            Some(err) => Err(err),
            None => {
                let transport = server::spawn(plan.response.source());
                Connection::open(transport, self.opts.clone())
                    .query_exclusive(term.clone(), options.clone())
                    .await
            }
        };

        let outcome = match &result {
            Ok(_) => ExecutionOutcome::Returned,
            Err(err) => ExecutionOutcome::Failed(err.clone()),
        };
        tracing::debug!(term = %term, outcome = ?outcome, "mocked query executed");
        self.record(term, options, outcome);
        result
    }
}

/// Handle to a registered expectation.
///
/// Configuration methods apply immediately and return the handle so calls
/// can be chained; keep the handle to assert on the expectation later.
#[derive(Debug, Clone)]
pub struct MockQuery {
    mock: Mock,
    index: usize,
}

impl MockQuery {
    /// Answer matching queries with `response`.
    pub fn returns(self, response: impl Into<MockResponse>) -> Self {
        let response = response.into();
        self.mock.configure(self.index, |e| e.response = response);
        self
    }

    /// Fail matching queries with `err` instead of returning a cursor.
    pub fn returns_error(self, err: Error) -> Self {
        self.mock.configure(self.index, |e| e.error = Some(err));
        self
    }

    /// Accept exactly one execution.
    pub fn once(self) -> Self {
        self.times(1)
    }

    /// Accept exactly two executions.
    pub fn twice(self) -> Self {
        self.times(2)
    }

    /// Accept exactly `n` executions. Zero means unlimited.
    pub fn times(self, n: u32) -> Self {
        let repeat = if n == 0 {
            Repeat::Unlimited
        } else {
            Repeat::Remaining(n)
        };
        self.mock.configure(self.index, |e| e.repeat = repeat);
        self
    }

    /// Delay each matching execution by `delay`.
    pub fn after(self, delay: Duration) -> Self {
        self.mock
            .configure(self.index, |e| e.gate = Some(Gate::After(delay)));
        self
    }

    /// Block each matching execution until `gate` holds `true`.
    pub fn wait_until(self, gate: watch::Receiver<bool>) -> Self {
        self.mock
            .configure(self.index, |e| e.gate = Some(Gate::Until(gate)));
        self
    }

    /// Register another expectation on the same mock.
    pub fn on(&self, term: impl Into<Term>) -> MockQuery {
        self.mock.on(term)
    }

    /// The expected term.
    #[must_use]
    pub fn term(&self) -> Term {
        self.mock
            .registry
            .lock()
            .expectations
            .get(self.index)
            .map(|e| e.term.clone())
            .unwrap_or(Term::Anything)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_claim_skips_exhausted() {
        let mock = Mock::new();
        mock.on(r::table("users")).returns(json!(1)).once();
        mock.on(r::table("users")).returns(json!(2));

        let first = mock.claim(&r::table("users"), &QueryOptions::new()).unwrap();
        let second = mock.claim(&r::table("users"), &QueryOptions::new()).unwrap();
        assert!(matches!(first.response, MockResponse::Value(v) if v == json!(1)));
        assert!(matches!(second.response, MockResponse::Value(v) if v == json!(2)));
    }

    #[test]
    fn test_times_zero_is_unlimited() {
        let mock = Mock::new();
        mock.on(r::table("users")).times(0);
        for _ in 0..10 {
            assert!(mock.claim(&r::table("users"), &QueryOptions::new()).is_some());
        }
    }

    #[test]
    fn test_options_take_part_in_matching() {
        let mock = Mock::new();
        mock.on_with_options(r::table("users"), QueryOptions::new().db("app"));

        assert!(mock.claim(&r::table("users"), &QueryOptions::new()).is_none());
        assert!(
            mock.claim(&r::table("users"), &QueryOptions::new().db("app"))
                .is_some()
        );
    }

    #[test]
    fn test_value_source_spreads_arrays() {
        let ChunkSource::Once(Some(chunk)) = MockResponse::value(json!([1, 2, 3])).source() else {
            unreachable!("static values produce a single chunk");
        };
        assert_eq!(chunk, vec![json!(1), json!(2), json!(3)]);

        let ChunkSource::Once(Some(chunk)) = MockResponse::value(json!({"a": 1})).source() else {
            unreachable!("static values produce a single chunk");
        };
        assert_eq!(chunk, vec![json!({"a": 1})]);
    }

    #[test]
    fn test_feed_push_after_close() {
        let (feed, _response) = MockResponse::feed();
        assert!(feed.push(vec![json!(1)]));
        feed.close();
        assert!(!feed.push(vec![json!(2)]));
    }

    #[test]
    fn test_unmet_message_lists_queries() {
        let failure = AssertionFailure::ExpectationsUnmet {
            met: 1,
            total: 2,
            unmet: 1,
            queries: vec!["r.table(\"users\")".into()],
        };
        let message = failure.to_string();
        assert!(message.starts_with("FAIL: 1 out of 2 expectation(s) were met."));
        assert!(message.contains("r.table(\"users\")"));
    }
}
