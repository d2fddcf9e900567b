#![allow(missing_docs)]

mod common;

use common::test_helpers::{status, ScriptedFetch, Step};
use ninefetch::{AbortController, AbortReason, Client, InstantSleeper, Options};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn hanging_fetch_times_out_and_aborts_its_signal() {
    let fetch = ScriptedFetch::hanging();
    let client = Client::new(fetch.clone());
    let started = Instant::now();

    let err = client
        .get(
            "https://slow.test/report",
            Options::new().timeout(Duration::from_millis(100)).retry(0u32),
        )
        .send()
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(fetch.calls(), 1);
    assert_eq!(fetch.signals()[0].reason(), Some(AbortReason::Timeout));
}

#[tokio::test(start_paused = true)]
async fn timeout_is_per_attempt_and_retried() {
    let fetch = ScriptedFetch::new([Step::Hang, Step::Respond(status(200))]);
    let client = Client::new(fetch.clone()).with_sleeper(InstantSleeper);

    let response = client
        .get("https://slow.test/once", Options::new().timeout(Duration::from_millis(50)))
        .send()
        .await
        .unwrap()
        .unwrap();

    assert!(response.is_ok());
    assert_eq!(fetch.calls(), 2);
    assert_eq!(fetch.signals()[0].reason(), Some(AbortReason::Timeout));
    assert_eq!(fetch.signals()[1].reason(), None);
}

#[tokio::test(start_paused = true)]
async fn caller_cancel_wins_over_long_timeout() {
    let fetch = ScriptedFetch::hanging();
    let client = Client::new(fetch.clone());
    let controller = AbortController::new();
    let trigger = controller.clone();
    let started = Instant::now();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.abort();
    });

    let err = client
        .get(
            "https://slow.test/cancel",
            Options::new().timeout(Duration::from_secs(5)).signal(controller.signal()),
        )
        .send()
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(fetch.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(fetch.signals()[0].reason(), Some(AbortReason::Cancelled));
}

#[tokio::test]
async fn already_cancelled_signal_fails_without_retry() {
    let fetch = ScriptedFetch::hanging();
    let controller = AbortController::new();
    controller.abort();

    let err = Client::new(fetch.clone())
        .get("https://slow.test/early", Options::new().signal(controller.signal()))
        .send()
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(fetch.calls() <= 1);
}

#[tokio::test]
async fn timeouts_above_the_timer_range_are_configuration_errors() {
    let fetch = ScriptedFetch::statuses(&[200]);

    let err = Client::new(fetch.clone())
        .get("https://slow.test/huge", Options::new().timeout(Duration::from_secs(3_000_000)))
        .send()
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(fetch.calls(), 0);
}
