// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use axum_test::TestServer;

use super::{build_router, MirrorServer, MIRRORED_HEADER};
use crate::metrics::Metrics;
use crate::test_support::MockServiceDiscover;

const MANIFEST_BODY: &str = r#"{"schemaVersion":2,"config":{},"layers":[]}"#;

fn mirror_server(
    sd: Arc<MockServiceDiscover>,
    resolve_latest_tag: bool,
) -> (TestServer, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new().unwrap());
    let state = Arc::new(
        MirrorServer::new(
            sd as Arc<dyn crate::sd::ServiceDiscover>,
            Arc::clone(&metrics),
            3,
            Duration::from_secs(1),
            resolve_latest_tag,
        )
        .unwrap(),
    );
    (TestServer::new(build_router(state)).unwrap(), metrics)
}

/// Bind a peer stub that answers every request with the given status.
async fn stub_peer(status: StatusCode, body: &'static str) -> SocketAddr {
    let router = Router::new().fallback(move || async move {
        (
            status,
            [
                ("Content-Type", "application/vnd.oci.image.manifest.v1+json"),
                ("Docker-Content-Digest", "sha256:abcd"),
            ],
            body,
        )
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
async fn dead_peer() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn v2_probe_returns_ok() {
    let (server, _) = mirror_server(Arc::new(MockServiceDiscover::default()), true);
    server.get("/v2").await.assert_status_ok();
}

#[tokio::test]
async fn non_get_requests_are_rejected() {
    let (server, _) = mirror_server(Arc::new(MockServiceDiscover::default()), true);
    server.post("/v2/app/manifests/v1").await.assert_status_not_found();
}

#[tokio::test]
async fn already_mirrored_requests_are_never_forwarded() {
    let sd = Arc::new(MockServiceDiscover::default());
    let (server, _) = mirror_server(Arc::clone(&sd), true);

    let resp = server
        .get("/v2/app/manifests/sha256:abcd")
        .add_header(MIRRORED_HEADER, "true")
        .await;
    resp.assert_status_not_found();
    assert_eq!(sd.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn latest_tag_is_filtered_before_any_directory_call() {
    let sd = Arc::new(MockServiceDiscover::default());
    let (server, _) = mirror_server(Arc::clone(&sd), false);

    let resp = server.get("/v2/app/manifests/latest").add_query_param("ns", "reg.example.com").await;
    resp.assert_status_not_found();
    assert_eq!(sd.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn latest_tag_is_mirrored_when_resolution_is_enabled() {
    let sd = Arc::new(MockServiceDiscover::default());
    let peer = stub_peer(StatusCode::OK, MANIFEST_BODY).await;
    sd.holders.lock().unwrap().push(peer);
    let (server, _) = mirror_server(Arc::clone(&sd), true);

    let resp = server.get("/v2/app/manifests/latest").await;
    resp.assert_status_ok();
    assert_eq!(sd.resolve_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn falls_through_failing_peers_to_the_first_healthy_one() {
    let sd = Arc::new(MockServiceDiscover::default());
    let p1 = dead_peer().await;
    let p2 = stub_peer(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
    let p3 = stub_peer(StatusCode::OK, MANIFEST_BODY).await;
    {
        let mut holders = sd.holders.lock().unwrap();
        holders.push(p1);
        holders.push(p2);
        holders.push(p3);
    }
    let (server, _) = mirror_server(Arc::clone(&sd), true);

    let resp = server.get("/v2/app/manifests/sha256:abcd").await;
    resp.assert_status_ok();
    assert_eq!(resp.text(), MANIFEST_BODY);
    assert_eq!(
        resp.headers().get("docker-content-digest").unwrap().to_str().unwrap(),
        "sha256:abcd"
    );
}

#[tokio::test]
async fn all_peers_failing_yields_not_found() {
    let sd = Arc::new(MockServiceDiscover::default());
    let p1 = dead_peer().await;
    let p2 = stub_peer(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
    {
        let mut holders = sd.holders.lock().unwrap();
        holders.push(p1);
        holders.push(p2);
    }
    let (server, _) = mirror_server(Arc::clone(&sd), true);

    server.get("/v2/app/manifests/sha256:abcd").await.assert_status_not_found();
}

#[tokio::test]
async fn no_holders_yields_not_found() {
    let sd = Arc::new(MockServiceDiscover::default());
    let (server, _) = mirror_server(Arc::clone(&sd), true);

    server.get("/v2/app/blobs/sha256:abcd").await.assert_status_not_found();
    assert_eq!(sd.resolve_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mirror_hits_and_misses_are_counted() {
    let sd = Arc::new(MockServiceDiscover::default());
    let peer = stub_peer(StatusCode::OK, MANIFEST_BODY).await;
    sd.holders.lock().unwrap().push(peer);
    let (server, metrics) = mirror_server(Arc::clone(&sd), true);

    server
        .get("/v2/app/manifests/sha256:abcd")
        .add_query_param("ns", "reg.example.com")
        .await
        .assert_status_ok();

    let hit = metrics
        .mirror_requests_total
        .with_label_values(&["reg.example.com", "hit", "manifest"])
        .get();
    assert_eq!(hit, 1);
}
