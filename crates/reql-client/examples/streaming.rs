//! Streaming query results example.
//!
//! Reads a table batch by batch, first through `Cursor::next` and then as a
//! `Stream`, and runs a few queries concurrently over one connection.
//!
//! # Running
//!
//! ```bash
//! REQL_ADDRESS=localhost:28015 cargo run --example streaming
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Instant;

use futures_util::StreamExt;
use reql_client::{ConnectOpts, Connection, Error, RunExt};
use reql_protocol::r;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let address = std::env::var("REQL_ADDRESS").unwrap_or_else(|_| "localhost:28015".into());
    let database = std::env::var("REQL_DATABASE").unwrap_or_else(|_| "test".into());

    let opts = ConnectOpts::from_connection_string(&format!("Address={address};Database={database}"))?;
    let conn = Connection::dial(opts).await?;
    println!("Connected to {address}");

    println!("\n=== Pulling values one at a time ===");
    let start = Instant::now();
    let mut cursor = r::table("events").run(&conn).await?;
    let mut count = 0usize;
    while let Some(_event) = cursor.next().await? {
        count += 1;
    }
    println!("Read {count} events in {:?}", start.elapsed());

    println!("\n=== Consuming a cursor as a stream ===");
    let cursor = r::table("events").limit(10).run(&conn).await?;
    let mut stream = std::pin::pin!(cursor.into_stream());
    while let Some(event) = stream.next().await {
        println!("  {}", event?);
    }

    println!("\n=== Concurrent queries on one connection ===");
    let (users, posts) = tokio::join!(
        async { r::table("users").count().run(&conn).await?.one().await },
        async { r::table("posts").count().run(&conn).await?.one().await },
    );
    println!("users: {}, posts: {}", users?, posts?);

    conn.close().await;
    println!("\nDone!");

    Ok(())
}
