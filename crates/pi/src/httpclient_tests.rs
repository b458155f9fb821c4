// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use reqwest::Method;
use tokio_util::sync::CancellationToken;

use super::{do_request_with_retry, HttpError};

struct Served {
    url: String,
    hits: Arc<AtomicU32>,
}

/// Serve a handler that returns `failures` 500s before answering 200.
async fn serve_flaky(failures: u32) -> Served {
    let hits = Arc::new(AtomicU32::new(0));
    let state = Arc::clone(&hits);
    let router = Router::new().route(
        "/",
        get(move |State(hits): State<Arc<AtomicU32>>| async move {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            }
        })
        .with_state(state),
    );
    serve(router, hits).await
}

async fn serve_status(status: StatusCode) -> Served {
    let hits = Arc::new(AtomicU32::new(0));
    let state = Arc::clone(&hits);
    let router = Router::new().route(
        "/",
        get(move |State(hits): State<Arc<AtomicU32>>| async move {
            hits.fetch_add(1, Ordering::SeqCst);
            (status, "nope")
        })
        .with_state(state),
    );
    serve(router, hits).await
}

async fn serve(router: Router, hits: Arc<AtomicU32>) -> Served {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Served { url: format!("http://{addr}/"), hits }
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn retries_5xx_until_success() {
    let served = serve_flaky(2).await;
    let cancel = CancellationToken::new();

    let resp = do_request_with_retry(
        &client(),
        Method::GET,
        &served.url,
        None,
        Duration::from_secs(1),
        Duration::from_secs(10),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(served.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn not_found_is_a_sentinel_and_not_retried() {
    let served = serve_status(StatusCode::NOT_FOUND).await;
    let cancel = CancellationToken::new();

    let err = do_request_with_retry(
        &client(),
        Method::GET,
        &served.url,
        None,
        Duration::from_secs(1),
        Duration::from_secs(10),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HttpError::NotFound(_)), "got: {err}");
    assert_eq!(served.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn other_4xx_surface_immediately() {
    let served = serve_status(StatusCode::BAD_REQUEST).await;
    let cancel = CancellationToken::new();

    let err = do_request_with_retry(
        &client(),
        Method::GET,
        &served.url,
        None,
        Duration::from_secs(1),
        Duration::from_secs(10),
        &cancel,
    )
    .await
    .unwrap_err();

    match err {
        HttpError::Client { status, body } => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, "nope");
        }
        other => panic!("expected client error, got: {other}"),
    }
    assert_eq!(served.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn total_timeout_bounds_retries() {
    let served = serve_status(StatusCode::INTERNAL_SERVER_ERROR).await;
    let cancel = CancellationToken::new();

    let err = do_request_with_retry(
        &client(),
        Method::GET,
        &served.url,
        None,
        Duration::from_millis(100),
        Duration::from_millis(350),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HttpError::DeadlineExceeded { .. }), "got: {err}");
    assert!(served.hits.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn cancellation_stops_the_retry_loop() {
    let served = serve_status(StatusCode::INTERNAL_SERVER_ERROR).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = do_request_with_retry(
        &client(),
        Method::GET,
        &served.url,
        None,
        Duration::from_secs(1),
        Duration::from_secs(10),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HttpError::Cancelled { .. }), "got: {err}");
}

#[tokio::test]
async fn transport_errors_are_retried_to_deadline() {
    // Nothing listens on this port.
    let cancel = CancellationToken::new();
    let err = do_request_with_retry(
        &client(),
        Method::GET,
        "http://127.0.0.1:1/",
        None,
        Duration::from_millis(100),
        Duration::from_millis(300),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HttpError::DeadlineExceeded { .. }), "got: {err}");
}
