//! # reql-client
//!
//! Async ReQL client core: a multiplexed connection, streaming cursors and a
//! pluggable query executor.
//!
//! ## Features
//!
//! - **Token multiplexing**: many queries in flight on one connection
//! - **Streaming cursors**: results pulled batch by batch with one
//!   continuation in flight per query
//! - **Pluggable execution**: code written against [`QueryExecutor`] runs
//!   unchanged against a live [`Connection`] or a test double
//!
//! ## Example
//!
//! ```rust,ignore
//! use reql_client::{ConnectOpts, Connection, RunExt};
//! use reql_protocol::r;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let opts = ConnectOpts::from_connection_string("Address=localhost:28015;Database=app")?;
//!     let conn = Connection::dial(opts).await?;
//!
//!     let mut cursor = r::table("users").filter(r::func(|u| u.field("active").eq(true)))
//!         .run(&conn)
//!         .await?;
//!
//!     while let Some(user) = cursor.next().await? {
//!         println!("{user}");
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Timeouts
//!
//! There is no timeout at this layer. Race [`Cursor::next`] against
//! `tokio::time::timeout` and close the cursor when the timer wins.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod cursor;
pub mod dispatch;
pub mod error;

pub use config::ConnectOpts;
pub use connection::{Connection, Transport};
pub use cursor::Cursor;
pub use dispatch::{QueryExecutor, RunExt, exec, run};
pub use error::{Error, Result};
