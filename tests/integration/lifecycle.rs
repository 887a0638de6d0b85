//! Lifecycle of a call driven by the application.

use std::sync::atomic::Ordering;

use tandem::{
    call::{CallError, Stage},
    coordinator::CoordinatorError,
    session::SessionState,
};

use crate::fakes::Harness;

#[tokio::test]
async fn concurrent_joins_share_single_flight() {
    let h = Harness::new();
    let call = h.client.call("default", "single-flight");

    let (first, second) = tokio::join!(call.join(true), call.join(true));

    first.unwrap();
    second.unwrap();
    assert_eq!(h.coordinator.join_count(), 1);
    assert_eq!(h.sfu("sfu-1").joins.lock().unwrap().len(), 1);
    assert_eq!(call.stage(), Stage::Joined);
    assert_eq!(call.session_state(), SessionState::Connected);
}

#[tokio::test]
async fn concurrent_joins_share_failure() {
    let h = Harness::new();
    h.coordinator.fail_with(CoordinatorError::Api {
        code: 404,
        message: "call not found".into(),
    });
    let call = h.client.call("default", "missing");

    let (first, second) = tokio::join!(call.join(false), call.join(false));

    let (first, second) = (first.unwrap_err(), second.unwrap_err());
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(h.coordinator.join_count(), 1);
    assert!(matches!(call.stage(), Stage::Error(_)));
    assert_eq!(call.session_state(), SessionState::Idle);
}

#[tokio::test]
async fn retries_join_on_transport_errors() {
    let h = Harness::new();
    h.coordinator
        .fail_with(CoordinatorError::Transport("connection reset".into()));
    let call = h.client.call("default", "flaky");

    let err = call.join(false).await.unwrap_err();

    assert!(matches!(
        err.into_inner(),
        CallError::Session(_) | CallError::Coordinator(_),
    ));
    assert_eq!(h.coordinator.join_count(), 2);
}

#[tokio::test]
async fn second_join_resolves_right_away() {
    let h = Harness::new();
    let call = h.client.call("default", "rejoin");

    call.join(true).await.unwrap();
    call.join(true).await.unwrap();

    assert_eq!(h.coordinator.join_count(), 1);
}

#[tokio::test]
async fn accept_waits_for_running_join() {
    let h = Harness::new();
    let call = h.client.call("default", "ordered");

    let (joined, accepted) = tokio::join!(call.join(true), call.accept());

    joined.unwrap();
    accepted.unwrap();
    assert_eq!(h.coordinator.join_count(), 1);
    assert_eq!(h.coordinator.accepts.load(Ordering::SeqCst), 1);
    assert_eq!(call.stage(), Stage::Accepted);
}

#[tokio::test]
async fn leave_evicts_call() {
    let h = Harness::new();
    let call = h.client.call("default", "leaving");
    call.join(true).await.unwrap();
    let sfu = h.sfu("sfu-1");

    call.leave().await;

    assert_eq!(call.stage(), Stage::Idle);
    assert_eq!(call.session_state(), SessionState::Closed);
    assert_eq!(sfu.leaves.load(Ordering::SeqCst), 1);
    assert!(sfu.transports().iter().all(|t| t.is_closed()));
    assert!(h.client.get("default:leaving").is_none());
    assert!(h.peers.open_since(0).is_empty());
}
