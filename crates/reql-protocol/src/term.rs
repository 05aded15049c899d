//! Query term tree.
//!
//! A [`Term`] is the immutable AST a query is built from. Terms serialize to
//! the ReQL JSON wire shape via [`Term::build`] and can be compared
//! structurally via [`Term::matches`], which treats two terms as equal when
//! they differ only in the numbering of their function variables.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::{Map, Value, json};

/// Identifier of a function-bound variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub i64);

/// ReQL term type codes.
///
/// The numeric values match the `Term.TermType` enumeration of the ql2
/// protocol definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[non_exhaustive]
pub enum TermType {
    /// Literal datum.
    Datum = 1,
    /// Array constructor.
    MakeArray = 2,
    /// Object constructor.
    MakeObj = 3,
    /// Function variable reference.
    Var = 10,
    /// JavaScript snippet.
    Javascript = 11,
    /// User-raised error.
    Error = 12,
    /// Implicit variable (`r.row`).
    ImplicitVar = 13,
    /// Database reference.
    Db = 14,
    /// Table reference.
    Table = 15,
    /// Single-document lookup by primary key.
    Get = 16,
    /// Equality.
    Eq = 17,
    /// Inequality.
    Ne = 18,
    /// Less than.
    Lt = 19,
    /// Less than or equal.
    Le = 20,
    /// Greater than.
    Gt = 21,
    /// Greater than or equal.
    Ge = 22,
    /// Boolean negation.
    Not = 23,
    /// Addition / concatenation.
    Add = 24,
    /// Subtraction.
    Sub = 25,
    /// Multiplication.
    Mul = 26,
    /// Division.
    Div = 27,
    /// Field access.
    GetField = 31,
    /// Field projection.
    Pluck = 33,
    /// Sequence map.
    Map = 38,
    /// Sequence filter.
    Filter = 39,
    /// Sequence ordering.
    OrderBy = 41,
    /// Sequence count.
    Count = 43,
    /// Document update.
    Update = 53,
    /// Document delete.
    Delete = 54,
    /// Document insert.
    Insert = 56,
    /// Database creation.
    DbCreate = 57,
    /// Database drop.
    DbDrop = 58,
    /// Table creation.
    TableCreate = 60,
    /// Table drop.
    TableDrop = 61,
    /// Boolean or.
    Or = 66,
    /// Boolean and.
    And = 67,
    /// Function literal.
    Func = 69,
    /// Skip elements.
    Skip = 70,
    /// Limit elements.
    Limit = 71,
    /// Ascending ordering marker.
    Asc = 73,
    /// Descending ordering marker.
    Desc = 74,
    /// Multi-key lookup.
    GetAll = 78,
    /// Changefeed.
    Changes = 152,
    /// Bracket access (`row("field")`).
    Bracket = 170,
}

impl TermType {
    /// Wire code for this term type.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// ReQL method name used when rendering terms.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Datum => "expr",
            Self::MakeArray => "makeArray",
            Self::MakeObj => "makeObj",
            Self::Var => "var",
            Self::Javascript => "js",
            Self::Error => "error",
            Self::ImplicitVar => "row",
            Self::Db => "db",
            Self::Table => "table",
            Self::Get => "get",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Not => "not",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::GetField => "field",
            Self::Pluck => "pluck",
            Self::Map => "map",
            Self::Filter => "filter",
            Self::OrderBy => "orderBy",
            Self::Count => "count",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Insert => "insert",
            Self::DbCreate => "dbCreate",
            Self::DbDrop => "dbDrop",
            Self::TableCreate => "tableCreate",
            Self::TableDrop => "tableDrop",
            Self::Or => "or",
            Self::And => "and",
            Self::Func => "func",
            Self::Skip => "skip",
            Self::Limit => "limit",
            Self::Asc => "asc",
            Self::Desc => "desc",
            Self::GetAll => "getAll",
            Self::Changes => "changes",
            Self::Bracket => "bracket",
        }
    }
}

/// A node of the query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A literal JSON value.
    Datum(Value),
    /// An operation applied to positional and optional arguments.
    Op {
        /// Operation kind.
        op: TermType,
        /// Positional arguments, the receiver first for method-style terms.
        args: Vec<Term>,
        /// Optional (named) arguments.
        optargs: BTreeMap<String, Term>,
    },
    /// A function literal binding `params` inside `body`.
    Func {
        /// Bound variable identifiers, in parameter order.
        params: Vec<VarId>,
        /// Function body.
        body: Box<Term>,
    },
    /// A reference to a function-bound variable.
    Var(VarId),
    /// Wildcard that structurally matches any term.
    ///
    /// Only meaningful to mock expectations; it builds to `null` on the wire.
    Anything,
}

impl Term {
    /// Create an operation term without optional arguments.
    #[must_use]
    pub fn op(op: TermType, args: Vec<Term>) -> Self {
        Self::Op {
            op,
            args,
            optargs: BTreeMap::new(),
        }
    }

    /// Create a function term.
    #[must_use]
    pub fn func(params: Vec<VarId>, body: Term) -> Self {
        Self::Func {
            params,
            body: Box::new(body),
        }
    }

    /// Operation kind of this term, if it is an operation.
    #[must_use]
    pub fn term_type(&self) -> TermType {
        match self {
            Self::Datum(_) | Self::Anything => TermType::Datum,
            Self::Op { op, .. } => *op,
            Self::Func { .. } => TermType::Func,
            Self::Var(_) => TermType::Var,
        }
    }

    /// Add an optional argument.
    ///
    /// Has no effect on terms that are not operations.
    #[must_use]
    pub fn with_optarg(mut self, key: impl Into<String>, value: impl Into<Term>) -> Self {
        if let Self::Op { optargs, .. } = &mut self {
            optargs.insert(key.into(), value.into());
        }
        self
    }

    fn method(self, op: TermType, mut rest: Vec<Term>) -> Self {
        let mut args = Vec::with_capacity(rest.len() + 1);
        args.push(self);
        args.append(&mut rest);
        Self::op(op, args)
    }

    /// Select a table from this database term.
    #[must_use]
    pub fn table(self, name: impl Into<String>) -> Self {
        self.method(TermType::Table, vec![Term::from(name.into())])
    }

    /// Look up a document by primary key.
    #[must_use]
    pub fn get(self, key: impl Into<Term>) -> Self {
        self.method(TermType::Get, vec![key.into()])
    }

    /// Look up documents by several keys.
    #[must_use]
    pub fn get_all<I, K>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Term>,
    {
        self.method(TermType::GetAll, keys.into_iter().map(Into::into).collect())
    }

    /// Filter a sequence with a predicate (object or function).
    #[must_use]
    pub fn filter(self, predicate: impl Into<Term>) -> Self {
        self.method(TermType::Filter, vec![predicate.into()])
    }

    /// Map a sequence through a function.
    #[must_use]
    pub fn map(self, func: impl Into<Term>) -> Self {
        self.method(TermType::Map, vec![func.into()])
    }

    /// Insert one or more documents.
    #[must_use]
    pub fn insert(self, documents: impl Into<Term>) -> Self {
        self.method(TermType::Insert, vec![documents.into()])
    }

    /// Update the selected documents.
    #[must_use]
    pub fn update(self, patch: impl Into<Term>) -> Self {
        self.method(TermType::Update, vec![patch.into()])
    }

    /// Delete the selected documents.
    #[must_use]
    pub fn delete(self) -> Self {
        self.method(TermType::Delete, Vec::new())
    }

    /// Keep only the first `n` elements.
    #[must_use]
    pub fn limit(self, n: i64) -> Self {
        self.method(TermType::Limit, vec![Term::from(n)])
    }

    /// Skip the first `n` elements.
    #[must_use]
    pub fn skip(self, n: i64) -> Self {
        self.method(TermType::Skip, vec![Term::from(n)])
    }

    /// Count elements.
    #[must_use]
    pub fn count(self) -> Self {
        self.method(TermType::Count, Vec::new())
    }

    /// Order by a field or ordering term.
    #[must_use]
    pub fn order_by(self, key: impl Into<Term>) -> Self {
        self.method(TermType::OrderBy, vec![key.into()])
    }

    /// Project the named fields.
    #[must_use]
    pub fn pluck<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.method(
            TermType::Pluck,
            fields.into_iter().map(|f| Term::from(f.into())).collect(),
        )
    }

    /// Access a field (`row("name")`).
    #[must_use]
    pub fn field(self, name: impl Into<String>) -> Self {
        self.method(TermType::Bracket, vec![Term::from(name.into())])
    }

    /// Equality comparison.
    #[must_use]
    pub fn eq(self, other: impl Into<Term>) -> Self {
        self.method(TermType::Eq, vec![other.into()])
    }

    /// Inequality comparison.
    #[must_use]
    pub fn ne(self, other: impl Into<Term>) -> Self {
        self.method(TermType::Ne, vec![other.into()])
    }

    /// Greater-than comparison.
    #[must_use]
    pub fn gt(self, other: impl Into<Term>) -> Self {
        self.method(TermType::Gt, vec![other.into()])
    }

    /// Less-than comparison.
    #[must_use]
    pub fn lt(self, other: impl Into<Term>) -> Self {
        self.method(TermType::Lt, vec![other.into()])
    }

    /// Addition.
    #[must_use]
    pub fn add(self, other: impl Into<Term>) -> Self {
        self.method(TermType::Add, vec![other.into()])
    }

    /// Logical and.
    #[must_use]
    pub fn and(self, other: impl Into<Term>) -> Self {
        self.method(TermType::And, vec![other.into()])
    }

    /// Logical or.
    #[must_use]
    pub fn or(self, other: impl Into<Term>) -> Self {
        self.method(TermType::Or, vec![other.into()])
    }

    /// Open a changefeed on this sequence.
    #[must_use]
    pub fn changes(self) -> Self {
        self.method(TermType::Changes, Vec::new())
    }

    /// Serialize to the ReQL JSON wire shape.
    #[must_use]
    pub fn build(&self) -> Value {
        match self {
            Self::Datum(value) => build_datum(value),
            Self::Op { op, args, optargs } => {
                let mut out = vec![
                    json!(op.code()),
                    Value::Array(args.iter().map(Term::build).collect()),
                ];
                if !optargs.is_empty() {
                    let map: Map<String, Value> = optargs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.build()))
                        .collect();
                    out.push(Value::Object(map));
                }
                Value::Array(out)
            }
            Self::Func { params, body } => {
                let ids: Vec<i64> = params.iter().map(|p| p.0).collect();
                json!([
                    TermType::Func.code(),
                    [[TermType::MakeArray.code(), ids], body.build()]
                ])
            }
            Self::Var(id) => json!([TermType::Var.code(), [id.0]]),
            Self::Anything => Value::Null,
        }
    }

    /// Structural equality ignoring function variable numbering.
    #[must_use]
    pub fn matches(&self, other: &Term) -> bool {
        self.matches_with(other, &mut VarMapping::default())
    }

    /// Structural equality that extends an existing variable mapping.
    ///
    /// Use this to compare several related terms (e.g. a query term and its
    /// options) under one consistent renaming.
    pub fn matches_with(&self, other: &Term, vars: &mut VarMapping) -> bool {
        match (self, other) {
            (Self::Anything, _) | (_, Self::Anything) => true,
            (Self::Datum(a), Self::Datum(b)) => a == b,
            (
                Self::Op {
                    op: lop,
                    args: largs,
                    optargs: lopts,
                },
                Self::Op {
                    op: rop,
                    args: rargs,
                    optargs: ropts,
                },
            ) => {
                lop == rop
                    && largs.len() == rargs.len()
                    && largs
                        .iter()
                        .zip(rargs)
                        .all(|(l, r)| l.matches_with(r, vars))
                    && optargs_match(lopts, ropts, vars)
            }
            (
                Self::Func {
                    params: lparams,
                    body: lbody,
                },
                Self::Func {
                    params: rparams,
                    body: rbody,
                },
            ) => {
                lparams.len() == rparams.len()
                    && lparams
                        .iter()
                        .zip(rparams)
                        .all(|(l, r)| vars.bind(*l, *r))
                    && lbody.matches_with(rbody, vars)
            }
            (Self::Var(l), Self::Var(r)) => vars.bind(*l, *r),
            _ => false,
        }
    }
}

/// Compare two optional-argument maps under a shared variable mapping.
pub(crate) fn optargs_match(
    left: &BTreeMap<String, Term>,
    right: &BTreeMap<String, Term>,
    vars: &mut VarMapping,
) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(k, l)| right.get(k).is_some_and(|r| l.matches_with(r, vars)))
}

fn build_datum(value: &Value) -> Value {
    match value {
        Value::Array(items) => json!([
            TermType::MakeArray.code(),
            items.iter().map(build_datum).collect::<Vec<_>>()
        ]),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), build_datum(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Bijective renaming table built while comparing two terms.
///
/// Each left-hand variable maps to exactly one right-hand variable and vice
/// versa; a comparison that would need a second partner fails.
#[derive(Debug, Default, Clone)]
pub struct VarMapping {
    forward: HashMap<VarId, VarId>,
    backward: HashMap<VarId, VarId>,
}

impl VarMapping {
    /// Record (or check) that `left` corresponds to `right`.
    ///
    /// Returns `false` if either side is already bound to a different
    /// partner.
    pub fn bind(&mut self, left: VarId, right: VarId) -> bool {
        match (self.forward.get(&left), self.backward.get(&right)) {
            (None, None) => {
                self.forward.insert(left, right);
                self.backward.insert(right, left);
                true
            }
            (Some(l), Some(r)) => *l == right && *r == left,
            _ => false,
        }
    }

    /// Number of variable pairs bound so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether no variables have been bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Self::Datum(value)
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Self::Datum(Value::String(value.to_owned()))
    }
}

impl From<String> for Term {
    fn from(value: String) -> Self {
        Self::Datum(Value::String(value))
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Self::Datum(Value::from(value))
    }
}

impl From<i32> for Term {
    fn from(value: i32) -> Self {
        Self::Datum(Value::from(value))
    }
}

impl From<u64> for Term {
    fn from(value: u64) -> Self {
        Self::Datum(Value::from(value))
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Self::Datum(Value::from(value))
    }
}

impl From<bool> for Term {
    fn from(value: bool) -> Self {
        Self::Datum(Value::Bool(value))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Datum(value) => write!(f, "{value}"),
            Self::Anything => f.write_str("r.mockAnything()"),
            Self::Var(id) => write!(f, "var_{}", id.0),
            Self::Func { params, body } => {
                f.write_str("func(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "var_{}", p.0)?;
                }
                write!(f, ") {{ {body} }}")
            }
            Self::Op { op, args, optargs } => {
                let chained = matches!(
                    args.first(),
                    Some(Self::Op { .. } | Self::Var(_) | Self::Anything)
                );
                let rest = if chained {
                    write!(f, "{}.{}(", args[0], op.name())?;
                    &args[1..]
                } else {
                    write!(f, "r.{}(", op.name())?;
                    &args[..]
                };
                let mut first = true;
                for arg in rest {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{arg}")?;
                }
                for (key, value) in optargs {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{key}={value}")?;
                }
                f.write_str(")")
            }
        }
    }
}
