//! # reql-testing
//!
//! Test doubles for code that runs ReQL queries.
//!
//! [`Mock`] implements [`reql_client::QueryExecutor`], so anything written
//! against the executor seam runs unchanged against it. Each expected query
//! is registered with a response program and a repeat count. Matched queries
//! are answered by a throwaway in-process server speaking the real frame
//! codec, so the cursor handed back behaves exactly like one read from a
//! live connection.
//!
//! ## Features
//!
//! - Structural term matching that ignores variable numbering
//! - Static values, pull-based generators and push-based feeds as responses
//! - Repeat counts (`once`, `twice`, `times`) and wait gates (`after`,
//!   `wait_until`)
//! - Aggregated assertions over the execution log
//!
//! ## Example
//!
//! ```rust,ignore
//! use reql_client::RunExt;
//! use reql_protocol::r;
//! use reql_testing::Mock;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn loads_user() -> Result<(), Box<dyn std::error::Error>> {
//!     let mock = Mock::new();
//!     mock.on(r::table("users").get(5))
//!         .returns(json!({"id": 5, "name": "x"}))
//!         .once();
//!
//!     let user = r::table("users").get(5).run(&mock).await?.one().await?;
//!     assert_eq!(user["name"], "x");
//!
//!     mock.assert_expectations()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;
mod server;

pub use mock::{
    AssertionFailure, ExecutionOutcome, ExecutionRecord, Mock, MockFeed, MockQuery, MockResponse,
};
