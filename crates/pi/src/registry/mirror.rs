// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mirror resolver: the registry endpoint local containerd pulls hit.
//!
//! Every `/v2` GET or HEAD is resolved against the directory and proxied
//! from the closest peer that can serve it. When no peer can, the handler
//! answers 404 and containerd falls through to the upstream registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Router;

use crate::httpclient::HttpError;
use crate::metrics::Metrics;
use crate::registry::{original_registry_from_query, Reference, MIRRORED_HEADER};
use crate::sd::ServiceDiscover;

/// Digest header peers attach to manifest and blob responses.
const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

pub struct MirrorServer {
    sd: Arc<dyn ServiceDiscover>,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
    resolve_retries: usize,
    resolve_timeout: Duration,
    resolve_latest_tag: bool,
}

impl MirrorServer {
    pub fn new(
        sd: Arc<dyn ServiceDiscover>,
        metrics: Arc<Metrics>,
        resolve_retries: usize,
        resolve_timeout: Duration,
        resolve_latest_tag: bool,
    ) -> anyhow::Result<Self> {
        // One pooled client is shared by every proxied request.
        let client = reqwest::Client::builder().pool_max_idle_per_host(100).build()?;
        Ok(Self { sd, client, metrics, resolve_retries, resolve_timeout, resolve_latest_tag })
    }
}

/// Build the axum `Router` for the mirror resolver.
pub fn build_router(state: Arc<MirrorServer>) -> Router {
    Router::new().fallback(handle).with_state(state)
}

async fn handle(State(s): State<Arc<MirrorServer>>, req: Request) -> Response<Body> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return StatusCode::NOT_FOUND.into_response();
    }
    let path = req.uri().path();
    if !path.starts_with("/v2") {
        return StatusCode::NOT_FOUND.into_response();
    }
    if path == "/v2" || path == "/v2/" {
        return StatusCode::OK.into_response();
    }

    let original_registry = original_registry_from_query(req.uri().query());
    let reference = match Reference::parse(path, &original_registry) {
        Ok(reference) => reference,
        Err(e) => {
            tracing::warn!(path, err = %e, "could not parse path per the OCI distribution spec");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    // A request that already passed through a mirror must not fan out
    // again; two agents would otherwise bounce it forever.
    if req.headers().get(MIRRORED_HEADER).map(|v| v.as_bytes()) == Some(b"true") {
        tracing::error!(path, "request has already been mirrored, refusing to forward");
        return StatusCode::NOT_FOUND.into_response();
    }

    handle_mirror(&s, req, reference).await
}

async fn handle_mirror(s: &MirrorServer, req: Request, reference: Reference) -> Response<Body> {
    let key = reference.key();

    let outcome = mirror(s, &req, &reference, &key).await;
    let cache = if outcome.status() == StatusCode::OK { "hit" } else { "miss" };
    s.metrics
        .mirror_requests_total
        .with_label_values(&[&reference.original_registry, cache, reference.kind.as_str()])
        .inc();
    outcome
}

async fn mirror(
    s: &MirrorServer,
    req: &Request,
    reference: &Reference,
    key: &str,
) -> Response<Body> {
    if !s.resolve_latest_tag && reference.has_latest_tag() {
        tracing::debug!(key, "skipping mirror request for image with latest tag");
        return StatusCode::NOT_FOUND.into_response();
    }

    let peers = match tokio::time::timeout(
        s.resolve_timeout,
        s.sd.resolve(key, s.resolve_retries),
    )
    .await
    {
        Ok(Ok(peers)) => peers,
        Ok(Err(HttpError::NotFound(e))) => {
            tracing::debug!(key, err = %e, "no peer holds this key");
            return StatusCode::NOT_FOUND.into_response();
        }
        Ok(Err(e)) => {
            tracing::error!(key, err = %e, "resolving mirrors failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(_) => {
            tracing::warn!(key, timeout_ms = s.resolve_timeout.as_millis() as u64, "resolving mirrors timed out");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Strictly sequential: one upstream request in flight per inbound pull.
    for peer in peers {
        match try_peer(s, req, peer).await {
            Ok(resp) => {
                tracing::debug!(key, peer = %peer, "mirror request served by peer");
                return resp;
            }
            Err(e) => {
                tracing::warn!(key, peer = %peer, err = %e, "peer failed, trying next");
            }
        }
    }

    tracing::info!(key, "all peers failed or none found");
    StatusCode::NOT_FOUND.into_response()
}

/// Proxy the inbound request to one peer. Anything but a 200 is an error so
/// the caller moves on to the next peer.
async fn try_peer(
    s: &MirrorServer,
    req: &Request,
    peer: SocketAddr,
) -> anyhow::Result<Response<Body>> {
    let path_and_query =
        req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| req.uri().path());
    let url = format!("http://{peer}{path_and_query}");

    let mut proxied = s
        .client
        .request(req.method().clone(), &url)
        .header(MIRRORED_HEADER, "true");
    if let Some(range) = req.headers().get(header::RANGE) {
        proxied = proxied.header(header::RANGE, range);
    }

    let upstream = proxied.send().await?;
    if upstream.status() != StatusCode::OK {
        anyhow::bail!("expected peer to respond with 200 OK but received {}", upstream.status());
    }

    let mut builder = Response::builder().status(StatusCode::OK);
    for name in [header::CONTENT_TYPE, header::CONTENT_LENGTH, header::ACCEPT_RANGES] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name.clone(), value.clone());
        }
    }
    if let Some(value) = upstream.headers().get(DOCKER_CONTENT_DIGEST) {
        builder = builder.header(DOCKER_CONTENT_DIGEST, value.clone());
    }

    let body = Body::from_stream(upstream.bytes_stream());
    Ok(builder.body(body)?)
}

#[cfg(test)]
#[path = "mirror_tests.rs"]
mod tests;
