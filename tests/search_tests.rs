mod common;

use std::sync::Arc;
use std::time::Duration;

use torrserve_finder::search::{SearchOutcome, SearchSession};

use common::{result, FakeApi};

#[tokio::test(start_paused = true)]
async fn short_incremental_queries_are_ignored() {
    let (session, mut rx) = SearchSession::new(Arc::new(FakeApi::new()));
    assert!(!session.submit("ab"));
    assert!(!session.submit("  a  "));
    assert!(!session.submit_final("   "));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn newer_query_replaces_the_running_one() {
    let api = FakeApi::new();
    api.set_search("star", Duration::from_secs(1), vec![result("star")]);
    api.set_search("star wars", Duration::from_millis(100), vec![result("star wars")]);
    let (session, mut rx) = SearchSession::new(Arc::new(api));

    assert!(session.submit("star"));
    assert!(session.submit("star wars"));

    match rx.recv().await {
        Some(SearchOutcome::Results { query, results }) => {
            assert_eq!(query, "star wars");
            assert_eq!(results[0].title, "star wars");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rx.try_recv().is_err(), "aborted search still reported");
}

#[tokio::test(start_paused = true)]
async fn empty_results_are_reported_only_when_submitted() {
    let (session, mut rx) = SearchSession::new(Arc::new(FakeApi::new()));

    assert!(session.submit("nothing here"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(rx.try_recv().is_err());

    assert!(session.submit_final("x"));
    assert_eq!(
        rx.recv().await,
        Some(SearchOutcome::NoResults { query: "x".into() })
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_drops_the_pending_search() {
    let api = FakeApi::new();
    api.set_search("dune", Duration::from_secs(1), vec![result("dune")]);
    let (session, mut rx) = SearchSession::new(Arc::new(api));

    session.submit("dune");
    session.cancel();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rx.try_recv().is_err());
}
