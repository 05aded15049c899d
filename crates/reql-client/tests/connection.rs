//! Connection and cursor tests against a scripted in-memory server.
//!
//! Each test wires a `Connection` to one end of a `tokio::io::duplex` pipe
//! and runs a small frame-level server on the other end whose replies are
//! produced by a per-test handler.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reql_client::{ConnectOpts, Connection, Error, QueryExecutor, RunExt};
use reql_codec::{Frame, FrameStream};
use reql_protocol::{ErrorKind, QueryOptions, QueryType, Response, Token, r};
use serde_json::{Value, json};

/// A frame the scripted server received.
#[derive(Debug, Clone)]
struct Received {
    token: Token,
    query_type: QueryType,
    payload: Value,
}

type Log = Arc<Mutex<Vec<Received>>>;

fn reply(response: Response) -> Frame {
    Frame::new(response.token, response.encode().unwrap())
}

/// Open a connection to a server driven by `handler`.
///
/// The handler returns the frames to send back, or `None` to hang up.
fn scripted<F>(handler: F) -> (Connection, Log)
where
    F: FnMut(&Received) -> Option<Vec<Frame>> + Send + 'static,
{
    scripted_with(ConnectOpts::default(), handler)
}

fn scripted_with<F>(opts: ConnectOpts, mut handler: F) -> (Connection, Log)
where
    F: FnMut(&Received) -> Option<Vec<Frame>> + Send + 'static,
{
    let (client, server) = tokio::io::duplex(4096);
    let log: Log = Arc::default();
    let server_log = Arc::clone(&log);

    tokio::spawn(async move {
        let mut stream = FrameStream::new(server);
        while let Some(Ok(frame)) = stream.next().await {
            let received = Received {
                token: frame.token,
                query_type: QueryType::peek(&frame.payload).unwrap(),
                payload: serde_json::from_slice(&frame.payload).unwrap(),
            };
            server_log.lock().push(received.clone());

            match handler(&received) {
                Some(frames) => {
                    for frame in frames {
                        if stream.send(frame).await.is_err() {
                            return;
                        }
                    }
                }
                None => return,
            }
        }
    });

    (Connection::open(client, opts), log)
}

fn count(log: &Log, query_type: QueryType) -> usize {
    log.lock()
        .iter()
        .filter(|r| r.query_type == query_type)
        .count()
}

async fn wait_for(log: &Log, query_type: QueryType, n: usize) {
    for _ in 0..100 {
        if count(log, query_type) >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never received {n} {query_type:?} frame(s)");
}

// =============================================================================
// Streaming and continuations
// =============================================================================

#[tokio::test]
async fn test_one_continuation_per_partial() {
    let mut continuations = 0;
    let (conn, log) = scripted(move |req| {
        let response = match req.query_type {
            QueryType::Start => Response::partial(req.token, vec![json!(1), json!(2)]),
            QueryType::Continue => {
                continuations += 1;
                if continuations == 1 {
                    Response::partial(req.token, vec![json!(3)])
                } else {
                    Response::sequence(req.token, vec![json!(4)])
                }
            }
            _ => return Some(Vec::new()),
        };
        Some(vec![reply(response)])
    });

    let mut cursor = conn.query(r::table("numbers"), QueryOptions::new()).await.unwrap();
    let values = cursor.all().await.unwrap();

    assert_eq!(values, vec![json!(1), json!(2), json!(3), json!(4)]);
    assert_eq!(count(&log, QueryType::Start), 1);
    assert_eq!(count(&log, QueryType::Continue), 2);
    assert!(cursor.is_finished());
    assert_eq!(conn.open_cursors(), 0);
}

#[tokio::test]
async fn test_continuation_waits_for_drained_buffer() {
    let (conn, log) = scripted(|req| {
        let response = match req.query_type {
            QueryType::Start => Response::partial(req.token, vec![json!("a"), json!("b")]),
            QueryType::Continue => Response::sequence(req.token, vec![json!("c")]),
            _ => return Some(Vec::new()),
        };
        Some(vec![reply(response)])
    });

    let mut cursor = conn.query(r::table("letters"), QueryOptions::new()).await.unwrap();
    assert_eq!(cursor.next().await.unwrap(), Some(json!("a")));
    assert_eq!(cursor.next().await.unwrap(), Some(json!("b")));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(count(&log, QueryType::Continue), 0);
    assert!(!cursor.is_finished());

    assert_eq!(cursor.next().await.unwrap(), Some(json!("c")));
    assert_eq!(count(&log, QueryType::Continue), 1);
    assert_eq!(cursor.next().await.unwrap(), None);
    assert_eq!(count(&log, QueryType::Continue), 1);
}

#[tokio::test]
async fn test_atom_is_a_single_value() {
    let (conn, _log) = scripted(|req| {
        Some(vec![reply(Response::atom(req.token, json!({"id": 5, "name": "x"})))])
    });

    let mut cursor = r::table("users").get(5).run(&conn).await.unwrap();
    assert!(cursor.is_atom());
    assert_eq!(cursor.next().await.unwrap(), Some(json!({"id": 5, "name": "x"})));
    assert!(cursor.is_finished());
    assert_eq!(cursor.next().await.unwrap(), None);
}

#[tokio::test]
async fn test_atom_array_is_not_unrolled() {
    let (conn, _log) =
        scripted(|req| Some(vec![reply(Response::atom(req.token, json!([1, 2, 3])))]));

    let mut cursor = r::expr(json!([1, 2, 3])).run(&conn).await.unwrap();
    assert_eq!(cursor.all().await.unwrap(), vec![json!([1, 2, 3])]);
}

#[tokio::test]
async fn test_one_and_empty_result() {
    let (conn, _log) = scripted(|req| Some(vec![reply(Response::sequence(req.token, vec![]))]));

    let mut cursor = r::table("empty").run(&conn).await.unwrap();
    assert!(matches!(cursor.one().await, Err(Error::EmptyResult)));
}

#[tokio::test]
async fn test_into_stream() {
    let (conn, _log) = scripted(|req| {
        let response = match req.query_type {
            QueryType::Start => Response::partial(req.token, vec![json!(1)]),
            QueryType::Continue => Response::sequence(req.token, vec![json!(2)]),
            _ => return Some(Vec::new()),
        };
        Some(vec![reply(response)])
    });

    let cursor = conn.query(r::table("t"), QueryOptions::new()).await.unwrap();
    let values: Vec<_> = cursor.into_stream().collect().await;
    assert_eq!(values.len(), 2);
    assert_eq!(values[1].as_ref().unwrap(), &json!(2));
}

// =============================================================================
// Multiplexing
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interleaved_responses_route_by_token() {
    let pending: Arc<Mutex<Vec<Token>>> = Arc::default();
    let (conn, _log) = scripted(move |req| {
        if req.query_type != QueryType::Start {
            return Some(Vec::new());
        }
        let mut pending = pending.lock();
        pending.push(req.token);
        if pending.len() < 2 {
            return Some(Vec::new());
        }
        // Answer the second query first.
        Some(
            pending
                .drain(..)
                .rev()
                .map(|token| reply(Response::sequence(token, vec![json!(token.get())])))
                .collect(),
        )
    });

    let mut first = conn.query(r::table("a"), QueryOptions::new()).await.unwrap();
    let mut second = conn.query(r::table("b"), QueryOptions::new()).await.unwrap();
    assert_ne!(first.token(), second.token());

    assert_eq!(first.all().await.unwrap(), vec![json!(first.token().get())]);
    assert_eq!(second.all().await.unwrap(), vec![json!(second.token().get())]);
}

#[tokio::test]
async fn test_tokens_are_unique_and_increasing() {
    let (conn, _log) = scripted(|req| Some(vec![reply(Response::sequence(req.token, vec![]))]));

    let mut tokens = Vec::new();
    for _ in 0..5 {
        let cursor = conn.query(r::table("t"), QueryOptions::new()).await.unwrap();
        tokens.push(cursor.token());
    }
    assert!(tokens.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(tokens[0], Token::new(1));
}

#[tokio::test]
async fn test_response_for_unknown_token_is_discarded() {
    let (conn, _log) = scripted(|req| {
        Some(vec![
            reply(Response::sequence(Token::new(999), vec![json!("stray")])),
            reply(Response::sequence(req.token, vec![json!("mine")])),
        ])
    });

    let mut cursor = conn.query(r::table("t"), QueryOptions::new()).await.unwrap();
    assert_eq!(cursor.all().await.unwrap(), vec![json!("mine")]);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_decode_error_only_fails_its_cursor() {
    let (conn, _log) = scripted(|req| {
        if req.token == Token::new(1) {
            Some(vec![Frame::new(req.token, &b"{not json"[..])])
        } else {
            Some(vec![reply(Response::sequence(req.token, vec![json!("ok")]))])
        }
    });

    let mut broken = conn.query(r::table("a"), QueryOptions::new()).await.unwrap();
    let mut healthy = conn.query(r::table("b"), QueryOptions::new()).await.unwrap();

    assert!(matches!(broken.next().await, Err(Error::Decode(_))));
    assert_eq!(broken.next().await.unwrap(), None);
    assert_eq!(healthy.all().await.unwrap(), vec![json!("ok")]);
    assert!(!conn.is_closed());
}

// =============================================================================
// Errors and shutdown
// =============================================================================

#[tokio::test]
async fn test_close_fails_open_cursors() {
    let (conn, _log) = scripted(|req| {
        Some(vec![reply(Response::partial(req.token, vec![json!(req.token.get())]))])
    });

    let mut first = conn.query(r::table("a"), QueryOptions::new()).await.unwrap();
    let mut second = conn.query(r::table("b"), QueryOptions::new()).await.unwrap();
    assert_eq!(first.next().await.unwrap(), Some(json!(1)));
    assert_eq!(second.next().await.unwrap(), Some(json!(2)));

    conn.close().await;
    conn.close().await;

    assert!(matches!(first.next().await, Err(Error::ConnectionClosed)));
    assert!(matches!(second.next().await, Err(Error::ConnectionClosed)));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_close_wakes_blocked_reader() {
    let (conn, _log) = scripted(|_| Some(Vec::new()));

    let mut cursor = conn.query(r::table("slow"), QueryOptions::new()).await.unwrap();
    let waiter = tokio::spawn(async move { cursor.next().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    conn.close().await;

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("cursor stayed blocked after close")
        .unwrap();
    assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_end_of_stream_closes_connection() {
    let (conn, _log) = scripted(|req| match req.query_type {
        QueryType::Start => Some(vec![reply(Response::partial(req.token, vec![json!(1)]))]),
        _ => None,
    });

    let mut cursor = conn.query(r::table("t"), QueryOptions::new()).await.unwrap();
    assert_eq!(cursor.next().await.unwrap(), Some(json!(1)));
    assert!(matches!(cursor.next().await, Err(Error::ConnectionClosed)));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_query_after_close() {
    let (conn, _log) = scripted(|_| Some(Vec::new()));
    conn.close().await;

    assert!(matches!(
        conn.query(r::table("t"), QueryOptions::new()).await,
        Err(Error::ConnectionClosed)
    ));
    assert!(!QueryExecutor::is_connected(&conn));
}

#[tokio::test]
async fn test_continue_unknown_token() {
    let (conn, _log) = scripted(|_| Some(Vec::new()));
    assert!(matches!(
        conn.continue_query(Token::new(42)).await,
        Err(Error::UnknownToken(t)) if t == Token::new(42)
    ));
}

#[tokio::test]
async fn test_server_error_surfaces_from_run() {
    let (conn, _log) = scripted(|req| {
        Some(vec![reply(Response::error(
            req.token,
            ErrorKind::Runtime,
            "Table `test.missing` does not exist.",
        ))])
    });

    let err = r::table("missing").run(&conn).await.unwrap_err();
    match err {
        Error::Server { kind, message } => {
            assert_eq!(kind, ErrorKind::Runtime);
            assert!(message.contains("does not exist"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(!conn.is_closed());
}

// =============================================================================
// Options, stop and noreply
// =============================================================================

#[tokio::test]
async fn test_default_database_is_injected() {
    let (conn, log) = scripted_with(ConnectOpts::new().database("app"), |req| {
        Some(vec![reply(Response::sequence(req.token, vec![]))])
    });

    r::table("users").exec(&conn).await.unwrap();
    r::table("users")
        .exec_with(QueryOptions::new().db("other"), &conn)
        .await
        .unwrap();

    let log = log.lock();
    assert_eq!(log[0].payload[2]["db"], json!([14, ["app"]]));
    assert_eq!(log[1].payload[2]["db"], json!([14, ["other"]]));
}

#[tokio::test]
async fn test_dropping_unfinished_cursor_sends_stop() {
    let (conn, log) = scripted(|req| match req.query_type {
        QueryType::Start => Some(vec![reply(Response::partial(req.token, vec![json!(1)]))]),
        QueryType::Stop => Some(vec![reply(Response::sequence(req.token, vec![]))]),
        _ => Some(Vec::new()),
    });

    let mut cursor = conn.query(r::table("t"), QueryOptions::new()).await.unwrap();
    assert_eq!(cursor.next().await.unwrap(), Some(json!(1)));
    drop(cursor);

    wait_for(&log, QueryType::Stop, 1).await;
    assert_eq!(conn.open_cursors(), 0);
}

#[tokio::test]
async fn test_close_cursor_is_idempotent() {
    let (conn, log) = scripted(|req| match req.query_type {
        QueryType::Start => Some(vec![reply(Response::partial(req.token, vec![json!(1)]))]),
        _ => Some(vec![reply(Response::sequence(req.token, vec![]))]),
    });

    let mut cursor = conn.query(r::table("t"), QueryOptions::new()).await.unwrap();
    assert_eq!(cursor.next().await.unwrap(), Some(json!(1)));
    cursor.close().await.unwrap();
    cursor.close().await.unwrap();

    assert!(cursor.is_finished());
    assert_eq!(cursor.next().await.unwrap(), None);
    wait_for(&log, QueryType::Stop, 1).await;
    assert_eq!(count(&log, QueryType::Stop), 1);
}

#[tokio::test]
async fn test_finished_cursor_close_sends_no_stop() {
    let (conn, log) = scripted(|req| Some(vec![reply(Response::sequence(req.token, vec![json!(1)]))]));

    let mut cursor = r::table("t").run(&conn).await.unwrap();
    cursor.close().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(count(&log, QueryType::Stop), 0);
}

#[tokio::test]
async fn test_noreply_exec_does_not_wait() {
    let (conn, log) = scripted(|req| match req.query_type {
        QueryType::NoreplyWait => Some(vec![reply(Response::new(
            req.token,
            reql_protocol::ResponseKind::WaitComplete,
        ))]),
        _ => Some(Vec::new()),
    });

    r::table("events")
        .insert(json!({"kind": "click"}))
        .exec_with(QueryOptions::new().noreply(true), &conn)
        .await
        .unwrap();
    assert_eq!(conn.open_cursors(), 0);

    conn.noreply_wait().await.unwrap();
    assert_eq!(count(&log, QueryType::Start), 1);
    assert_eq!(count(&log, QueryType::NoreplyWait), 1);
    assert_eq!(log.lock()[0].payload[2]["noreply"], json!(true));
}

#[tokio::test]
async fn test_oversized_frame_is_fatal() {
    let (conn, _log) = scripted_with(ConnectOpts::new().max_frame_size(32), |req| {
        Some(vec![reply(Response::sequence(
            req.token,
            vec![json!("this payload is far longer than the thirty-two byte limit")],
        ))])
    });

    let mut cursor = conn.query(r::table("t"), QueryOptions::new()).await.unwrap();
    assert!(matches!(cursor.next().await, Err(Error::MalformedFrame(_))));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_closing_exclusive_cursor_hangs_up_transport() {
    let (client, server) = tokio::io::duplex(4096);
    let conn = Connection::open(client, ConnectOpts::default());
    let mut server = FrameStream::new(server);

    let mut cursor = conn
        .clone()
        .query_exclusive(r::table("changes"), QueryOptions::new())
        .await
        .unwrap();
    let start = server.next().await.unwrap().unwrap();
    assert_eq!(QueryType::peek(&start.payload).unwrap(), QueryType::Start);

    cursor.close().await.unwrap();
    assert!(conn.is_closed());

    // No STOP goes out; the server just reads end of stream.
    let next = tokio::time::timeout(Duration::from_secs(2), server.next())
        .await
        .expect("server saw the hang-up");
    assert!(next.is_none());
}
