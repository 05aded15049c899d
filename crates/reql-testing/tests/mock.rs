//! Mock expectation engine tests.
//!
//! Every test drives the mock through the same executor seam production
//! code uses, so cursors come back through a real connection and frame
//! codec.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reql_client::{ConnectOpts, Error, QueryExecutor, RunExt, exec, run};
use reql_protocol::{ErrorKind, QueryOptions, r};
use reql_testing::{AssertionFailure, ExecutionOutcome, Mock, MockResponse};
use serde_json::json;
use tokio::sync::watch;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn test_single_value_once() {
    init_tracing();
    let mock = Mock::new();
    let query = mock
        .on(r::table("users").get(5))
        .returns(json!({"id": 5, "name": "x"}))
        .once();

    let mut cursor = r::table("users").get(5).run(&mock).await.unwrap();
    assert_eq!(cursor.next().await.unwrap(), Some(json!({"id": 5, "name": "x"})));
    assert_eq!(cursor.next().await.unwrap(), None);

    mock.assert_expectations().unwrap();
    mock.assert_executed(&query).unwrap();

    let second = r::table("users").get(5).run(&mock).await;
    assert!(matches!(second, Err(Error::UnexpectedQuery(_))));
}

#[tokio::test]
async fn test_chunked_generator_drains_in_order() {
    let mock = Mock::new();
    mock.on(r::table("numbers")).returns(MockResponse::chunks(vec![
        vec![json!(1), json!(2)],
        vec![json!(3), json!(4)],
        vec![json!(5)],
    ]));

    let mut cursor = r::table("numbers").run(&mock).await.unwrap();
    let mut values = Vec::new();
    for _ in 0..5 {
        assert!(!cursor.is_finished());
        values.push(cursor.next().await.unwrap().unwrap());
    }
    assert!(!cursor.is_finished());
    assert_eq!(cursor.next().await.unwrap(), None);
    assert!(cursor.is_finished());

    assert_eq!(values, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
}

#[tokio::test]
async fn test_execution_count_mismatch_names_both_counts() {
    let mock = Mock::new();
    let query = mock.on(r::table("users")).returns(json!([]));

    r::table("users").exec(&mock).await.unwrap();

    let failure = mock.assert_number_of_executions(&query, 2).unwrap_err();
    assert_eq!(
        failure,
        AssertionFailure::ExecutionCount {
            expected: 2,
            actual: 1
        }
    );
    assert_eq!(
        failure.to_string(),
        "Expected number of executions (2) does not match the actual number of executions (1)."
    );
    mock.assert_number_of_executions(&query, 1).unwrap();
}

#[tokio::test]
async fn test_times_three_then_unexpected() {
    let mock = Mock::new();
    let query = mock.on(r::table("users")).returns(json!([1])).times(3);

    for _ in 0..3 {
        let values = r::table("users").run(&mock).await.unwrap().all().await.unwrap();
        assert_eq!(values, vec![json!(1)]);
    }

    let fourth = r::table("users").run(&mock).await;
    assert!(matches!(fourth, Err(Error::UnexpectedQuery(_))));

    mock.assert_number_of_executions(&query, 3).unwrap();
    mock.assert_expectations().unwrap();
    assert_eq!(mock.executions().len(), 4);
    assert!(matches!(
        mock.executions()[3].outcome,
        ExecutionOutcome::Unexpected
    ));
}

#[tokio::test]
async fn test_expectations_aggregate_every_unmet_query() {
    let mock = Mock::new();
    mock.on(r::table("users")).returns(json!([])).twice();
    mock.on(r::table("posts")).returns(json!([]));
    mock.on(r::table("tags")).returns(json!([]));

    r::table("users").exec(&mock).await.unwrap();
    r::table("tags").exec(&mock).await.unwrap();

    let failure = mock.assert_expectations().unwrap_err();
    match &failure {
        AssertionFailure::ExpectationsUnmet {
            met,
            total,
            unmet,
            queries,
        } => {
            assert_eq!((*met, *total, *unmet), (1, 3, 2));
            assert_eq!(queries.len(), 2);
        }
        other => panic!("unexpected failure: {other:?}"),
    }
    assert!(
        failure
            .to_string()
            .starts_with("FAIL: 1 out of 3 expectation(s) were met.")
    );
}

#[tokio::test]
async fn test_assert_not_executed() {
    let mock = Mock::new();
    let users = mock.on(r::table("users")).returns(json!([]));
    let posts = users.on(r::table("posts")).returns(json!([]));

    r::table("users").exec(&mock).await.unwrap();

    mock.assert_not_executed(&posts).unwrap();
    let failure = mock.assert_not_executed(&users).unwrap_err();
    assert!(failure.to_string().contains("was executed, but should NOT have been"));

    let failure = mock.assert_executed(&posts).unwrap_err();
    assert!(failure.to_string().contains("should have been executed, but was not"));
}

#[tokio::test]
async fn test_configured_error_surfaces_from_run() {
    let mock = Mock::new();
    let query = mock
        .on(r::table("missing"))
        .returns_error(Error::Server {
            kind: ErrorKind::Runtime,
            message: "Table `missing` does not exist.".into(),
        })
        .once();

    let err = run(r::table("missing"), QueryOptions::new(), &mock)
        .await
        .unwrap_err();
    assert!(err.is_server_error());

    mock.assert_executed(&query).unwrap();
    assert!(matches!(
        mock.executions()[0].outcome,
        ExecutionOutcome::Failed(Error::Server { .. })
    ));
}

#[tokio::test]
async fn test_unconfigured_expectation_returns_empty_result() {
    let mock = Mock::new();
    mock.on(r::table("users"));

    let values = r::table("users").run(&mock).await.unwrap().all().await.unwrap();
    assert!(values.is_empty());
}

#[tokio::test]
async fn test_default_database_is_filled_in_before_matching() {
    let mock = Mock::with_opts(ConnectOpts::new().database("app"));
    let query = mock.on(r::table("users")).returns(json!([1]));

    let values = r::table("users").run(&mock).await.unwrap().all().await.unwrap();
    assert_eq!(values, vec![json!(1)]);
    mock.assert_number_of_executions(&query, 1).unwrap();

    // An explicit database still has to match the expectation's.
    let other = r::table("users")
        .run_with(QueryOptions::new().db("audit"), &mock)
        .await;
    assert!(matches!(other, Err(Error::UnexpectedQuery(_))));

    let executions = mock.executions();
    assert_eq!(
        executions[0].options.get("db").map(ToString::to_string),
        Some(r::db("app").to_string())
    );
}

#[tokio::test]
async fn test_anything_wildcard_matches_any_argument() {
    let mock = Mock::new();
    mock.on(r::table("users").get(r::mock_anything()))
        .returns(json!({"id": 1}));

    for id in [1, 2, 99] {
        let value = r::table("users").get(id).run(&mock).await.unwrap().one().await.unwrap();
        assert_eq!(value, json!({"id": 1}));
    }

    let other = r::table("posts").get(1).run(&mock).await;
    assert!(matches!(other, Err(Error::UnexpectedQuery(_))));
}

#[tokio::test]
async fn test_var_numbering_does_not_affect_matching() {
    let mock = Mock::new();
    let query = mock
        .on(r::table("users").filter(r::func(|u| u.field("age").gt(18))))
        .returns(json!([{"id": 1}]));

    // Build an unrelated function first so the variable ids differ.
    let _ = r::func(|x| x.field("ignored"));
    let values = r::table("users")
        .filter(r::func(|person| person.field("age").gt(18)))
        .run(&mock)
        .await
        .unwrap()
        .all()
        .await
        .unwrap();

    assert_eq!(values, vec![json!({"id": 1})]);
    mock.assert_number_of_executions(&query, 1).unwrap();
}

#[tokio::test]
async fn test_options_must_match() {
    let mock = Mock::new();
    mock.on_with_options(r::table("users"), QueryOptions::new().db("app"))
        .returns(json!([1]));

    let plain = r::table("users").run(&mock).await;
    assert!(matches!(plain, Err(Error::UnexpectedQuery(_))));

    let values = r::table("users")
        .run_with(QueryOptions::new().db("app"), &mock)
        .await
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(values, vec![json!(1)]);
}

#[tokio::test]
async fn test_generator_is_shared_across_executions() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mock = Mock::new();
    mock.on(r::table("events"))
        .returns(MockResponse::generator(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            (n % 2 == 0).then(|| vec![json!(n)])
        }))
        .twice();

    let first = r::table("events").run(&mock).await.unwrap().all().await.unwrap();
    let second = r::table("events").run(&mock).await.unwrap().all().await.unwrap();

    assert_eq!(first, vec![json!(0)]);
    assert_eq!(second, vec![json!(2)]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_feed_blocks_until_pushed() {
    let (feed, response) = MockResponse::feed();
    let mock = Mock::new();
    mock.on(r::table("changes")).returns(response).once();

    let reader = {
        let mock = mock.clone();
        tokio::spawn(async move {
            let mut cursor = r::table("changes").run(&mock).await.unwrap();
            let mut seen = Vec::new();
            while let Some(value) = cursor.next().await.unwrap() {
                seen.push(value);
            }
            seen
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!reader.is_finished());

    assert!(feed.push(vec![json!("a")]));
    assert!(feed.push(vec![json!("b"), json!("c")]));
    feed.close();

    let seen = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("feed reader finished")
        .unwrap();
    assert_eq!(seen, vec![json!("a"), json!("b"), json!("c")]);
}

#[tokio::test]
async fn test_dropping_cursor_on_blocked_feed_does_not_hang() {
    let (_feed, response) = MockResponse::feed();
    let mock = Mock::new();
    mock.on(r::table("changes")).returns(response);

    let cursor = mock
        .query(r::table("changes"), QueryOptions::new())
        .await
        .unwrap();
    drop(cursor);

    // The feed is still open; a second execution shares it and is unaffected.
    let mut cursor = mock
        .query(r::table("changes"), QueryOptions::new())
        .await
        .unwrap();
    cursor.close().await.unwrap();
    assert!(cursor.is_finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closing_idle_feed_cursor_keeps_later_chunks() {
    let (feed, response) = MockResponse::feed();
    let mock = Mock::new();
    mock.on(r::table("changes")).returns(response);

    assert!(feed.push(vec![json!(1)]));
    let mut cursor = r::table("changes").run(&mock).await.unwrap();
    assert_eq!(cursor.next().await.unwrap(), Some(json!(1)));

    let idle = tokio::time::timeout(Duration::from_millis(50), cursor.next()).await;
    assert!(idle.is_err());
    cursor.close().await.unwrap();

    // Pushed while the first cursor is still held; the next execution gets it.
    assert!(feed.push(vec![json!(2)]));
    let value = tokio::time::timeout(Duration::from_secs(2), async {
        let mut next = r::table("changes").run(&mock).await.unwrap();
        next.next().await.unwrap()
    })
    .await
    .expect("second execution received the pushed chunk");
    assert_eq!(value, Some(json!(2)));
    drop(cursor);
}

#[tokio::test]
async fn test_after_delays_execution() {
    tokio::time::pause();

    let mock = Mock::new();
    mock.on(r::table("slow"))
        .returns(json!([1]))
        .after(Duration::from_secs(30));

    let started = tokio::time::Instant::now();
    let values = r::table("slow").run(&mock).await.unwrap().all().await.unwrap();
    assert_eq!(values, vec![json!(1)]);
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gated_execution_does_not_block_others() {
    init_tracing();
    let (open, gate) = watch::channel(false);
    let mock = Mock::new();
    let gated = mock
        .on(r::table("gated"))
        .returns(json!(["late"]))
        .wait_until(gate);
    mock.on(r::table("free")).returns(json!(["early"]));

    let blocked = {
        let mock = mock.clone();
        tokio::spawn(async move {
            r::table("gated").run(&mock).await.unwrap().all().await.unwrap()
        })
    };

    let early = tokio::time::timeout(Duration::from_secs(5), async {
        r::table("free").run(&mock).await.unwrap().all().await.unwrap()
    })
    .await
    .expect("ungated query was not held up by the gated one");
    assert_eq!(early, vec![json!("early")]);

    assert!(!blocked.is_finished());
    mock.assert_not_executed(&gated).unwrap();

    open.send(true).unwrap();
    let late = blocked.await.unwrap();
    assert_eq!(late, vec![json!("late")]);

    // The log holds completion order, not registration order.
    let order: Vec<_> = mock.executions().iter().map(|r| r.term.to_string()).collect();
    assert_eq!(order, vec![r::table("free").to_string(), r::table("gated").to_string()]);
}

#[tokio::test]
async fn test_exec_closes_synthetic_connection() {
    let mock = Mock::new();
    mock.on(r::table("users").insert(json!({"id": 1})))
        .returns(json!({"inserted": 1}));

    exec(r::table("users").insert(json!({"id": 1})), QueryOptions::new(), &mock)
        .await
        .unwrap();
    assert!(mock.is_connected());
    assert_eq!(mock.executions().len(), 1);
}
