//! Query payloads.
//!
//! A query is identified by its token and carries one of four request
//! types. Only `START` queries carry a term and options; the others refer
//! to an already-started query by token alone.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Map, Value, json};

use crate::error::ProtocolError;
use crate::frame::encode_frame;
use crate::term::{Term, VarMapping, optargs_match};
use crate::token::Token;

/// Query request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QueryType {
    /// Start a new query.
    Start = 1,
    /// Request the next batch of an open query.
    Continue = 2,
    /// Stop an open query.
    Stop = 3,
    /// Wait for all outstanding `noreply` writes to complete.
    NoreplyWait = 4,
}

impl QueryType {
    /// Create a query type from its wire code.
    pub fn from_code(code: u64) -> Result<Self, ProtocolError> {
        match code {
            1 => Ok(Self::Start),
            2 => Ok(Self::Continue),
            3 => Ok(Self::Stop),
            4 => Ok(Self::NoreplyWait),
            _ => Err(ProtocolError::UnknownQueryType(code)),
        }
    }

    /// Read the query type of an encoded query payload.
    pub fn peek(payload: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(payload)?;
        let code = value
            .as_array()
            .and_then(|items| items.first())
            .and_then(Value::as_u64)
            .ok_or_else(|| ProtocolError::Decode("query payload is not a typed array".into()))?;
        Self::from_code(code)
    }
}

/// Global optional arguments sent with a `START` query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    entries: BTreeMap<String, Term>,
}

impl QueryOptions {
    /// Create an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Term>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set an option in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Term>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Set the database the query runs against.
    #[must_use]
    pub fn db(self, name: impl Into<String>) -> Self {
        self.set("db", crate::r::db(name))
    }

    /// Ask the server not to reply to this query.
    #[must_use]
    pub fn noreply(self, noreply: bool) -> Self {
        self.set("noreply", noreply)
    }

    /// Whether the `noreply` option is set to `true`.
    #[must_use]
    pub fn is_noreply(&self) -> bool {
        matches!(self.entries.get("noreply"), Some(Term::Datum(Value::Bool(true))))
    }

    /// Look up an option.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Term> {
        self.entries.get(key)
    }

    /// Whether an option is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Term)> {
        self.entries.iter()
    }

    /// Serialize to the wire object.
    #[must_use]
    pub fn build(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.build()))
            .collect();
        Value::Object(map)
    }

    /// Structural comparison sharing a variable mapping with the query term.
    pub fn matches_with(&self, other: &QueryOptions, vars: &mut VarMapping) -> bool {
        optargs_match(&self.entries, &other.entries, vars)
    }
}

/// A query ready to be written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Token correlating the query with its responses.
    pub token: Token,
    /// Request type.
    pub query_type: QueryType,
    /// Query term (`START` only).
    pub term: Option<Term>,
    /// Global optional arguments (`START` only).
    pub options: QueryOptions,
}

impl Query {
    /// Build a `START` query.
    #[must_use]
    pub fn start(token: Token, term: Term, options: QueryOptions) -> Self {
        Self {
            token,
            query_type: QueryType::Start,
            term: Some(term),
            options,
        }
    }

    /// Build a `CONTINUE` query for an open token.
    #[must_use]
    pub fn continuation(token: Token) -> Self {
        Self::bare(token, QueryType::Continue)
    }

    /// Build a `STOP` query for an open token.
    #[must_use]
    pub fn stop(token: Token) -> Self {
        Self::bare(token, QueryType::Stop)
    }

    /// Build a `NOREPLY_WAIT` query.
    #[must_use]
    pub fn noreply_wait(token: Token) -> Self {
        Self::bare(token, QueryType::NoreplyWait)
    }

    fn bare(token: Token, query_type: QueryType) -> Self {
        Self {
            token,
            query_type,
            term: None,
            options: QueryOptions::new(),
        }
    }

    /// Serialize the payload (without frame header).
    pub fn payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let code = self.query_type as u8;
        let value = match (self.query_type, &self.term) {
            (QueryType::Start, Some(term)) => json!([code, term.build(), self.options.build()]),
            (QueryType::Start, None) => {
                return Err(ProtocolError::Encode("START query without a term".into()));
            }
            _ => json!([code]),
        };
        serde_json::to_vec(&value).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Serialize the complete frame.
    pub fn encode_frame(&self) -> Result<Bytes, ProtocolError> {
        encode_frame(self.token, &self.payload()?)
    }
}
