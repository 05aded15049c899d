//! Root term constructors, in the style of ReQL's `r` namespace.
//!
//! ```rust,ignore
//! use reql_protocol::r;
//!
//! let adults = r::table("users").filter(r::func(|user| user.field("age").gt(18)));
//! ```

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;

use crate::term::{Term, TermType, VarId};

static NEXT_VAR_ID: AtomicI64 = AtomicI64::new(1);

fn next_var() -> VarId {
    VarId(NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed))
}

/// Reference a database.
#[must_use]
pub fn db(name: impl Into<String>) -> Term {
    Term::op(TermType::Db, vec![Term::from(name.into())])
}

/// Reference a table in the connection's default database.
#[must_use]
pub fn table(name: impl Into<String>) -> Term {
    Term::op(TermType::Table, vec![Term::from(name.into())])
}

/// Wrap a literal value.
#[must_use]
pub fn expr(value: impl Into<Value>) -> Term {
    Term::Datum(value.into())
}

/// Create a database.
#[must_use]
pub fn db_create(name: impl Into<String>) -> Term {
    Term::op(TermType::DbCreate, vec![Term::from(name.into())])
}

/// Drop a database.
#[must_use]
pub fn db_drop(name: impl Into<String>) -> Term {
    Term::op(TermType::DbDrop, vec![Term::from(name.into())])
}

/// Create a table in the connection's default database.
#[must_use]
pub fn table_create(name: impl Into<String>) -> Term {
    Term::op(TermType::TableCreate, vec![Term::from(name.into())])
}

/// Ascending ordering on a field.
#[must_use]
pub fn asc(field: impl Into<String>) -> Term {
    Term::op(TermType::Asc, vec![Term::from(field.into())])
}

/// Descending ordering on a field.
#[must_use]
pub fn desc(field: impl Into<String>) -> Term {
    Term::op(TermType::Desc, vec![Term::from(field.into())])
}

/// Wildcard term for mock expectations.
#[must_use]
pub fn mock_anything() -> Term {
    Term::Anything
}

/// Build a one-argument function with a freshly numbered variable.
pub fn func(body: impl FnOnce(Term) -> Term) -> Term {
    let x = next_var();
    Term::func(vec![x], body(Term::Var(x)))
}

/// Build a two-argument function with freshly numbered variables.
pub fn func2(body: impl FnOnce(Term, Term) -> Term) -> Term {
    let x = next_var();
    let y = next_var();
    Term::func(vec![x, y], body(Term::Var(x), Term::Var(y)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_func_numbers_are_fresh_but_match() {
        let a = table("users").filter(func(|u| u.field("active").eq(true)));
        let b = table("users").filter(func(|u| u.field("active").eq(true)));
        assert_ne!(a, b);
        assert!(a.matches(&b));
    }

    #[test]
    fn test_func2_keeps_parameter_order() {
        let a = func2(|x, y| x.add(y));
        let b = func2(|x, y| y.add(x));
        assert!(!a.matches(&b));
    }
}
