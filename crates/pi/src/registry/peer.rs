// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer-serving registry: the endpoint other agents' resolvers pull from.
//!
//! Serves manifests and blobs for locally cached content. Blob uploads are
//! admission-controlled by a semaphore and throttled by the process-wide
//! blob limiter; a request that arrives while every upload slot is taken is
//! rejected with 503 immediately so the caller can try its next peer.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::io::AsyncSeekExt;
use tokio::sync::Semaphore;

use crate::metrics::Metrics;
use crate::oci::{OciClient, OciError};
use crate::ratelimit::{limited_stream, BlobLimiter};
use crate::registry::{original_registry_from_query, Reference, ReferenceKind};

pub struct PeerServer {
    oci: Arc<dyn OciClient>,
    uploads: Arc<Semaphore>,
    limiter: Arc<BlobLimiter>,
    metrics: Arc<Metrics>,
    max_upload_connections: usize,
}

impl PeerServer {
    pub fn new(
        oci: Arc<dyn OciClient>,
        limiter: Arc<BlobLimiter>,
        metrics: Arc<Metrics>,
        max_upload_connections: usize,
    ) -> Self {
        Self {
            oci,
            uploads: Arc::new(Semaphore::new(max_upload_connections)),
            limiter,
            metrics,
            max_upload_connections,
        }
    }
}

/// Build the axum `Router` for the peer server.
pub fn build_router(state: Arc<PeerServer>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .fallback(handle)
        .with_state(state)
}

async fn handle(State(s): State<Arc<PeerServer>>, req: Request) -> Response<Body> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return status_response(StatusCode::NOT_FOUND);
    }

    let path = req.uri().path();
    if !path.starts_with("/v2") {
        return status_response(StatusCode::NOT_FOUND);
    }
    // OCI discovery probe.
    if path == "/v2" || path == "/v2/" {
        return status_response(StatusCode::OK);
    }

    let original_registry = original_registry_from_query(req.uri().query());
    let reference = match Reference::parse(path, &original_registry) {
        Ok(reference) => reference,
        Err(e) => {
            tracing::warn!(path, err = %e, "could not parse OCI distribution path");
            return status_response(StatusCode::NOT_FOUND);
        }
    };

    match reference.kind {
        ReferenceKind::Manifest => handle_manifest(&s, &req, reference).await,
        ReferenceKind::Blob => handle_blob(&s, &req, reference).await,
    }
}

async fn handle_manifest(
    s: &PeerServer,
    req: &Request,
    reference: Reference,
) -> Response<Body> {
    let digest = if reference.digest.is_empty() {
        match s.oci.resolve(&reference.tag_name()).await {
            Ok(digest) => digest,
            Err(e) => {
                tracing::warn!(name = %reference.tag_name(), err = %e, "could not resolve image tag");
                return status_response(StatusCode::NOT_FOUND);
            }
        }
    } else {
        reference.digest.clone()
    };

    let (manifest, media_type) = match s.oci.get_manifest(&digest).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(digest = %digest, err = %e, "could not get manifest content");
            return status_response(StatusCode::NOT_FOUND);
        }
    };

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, media_type)
        .header(header::CONTENT_LENGTH, manifest.len())
        .header("Docker-Content-Digest", digest.as_str());

    let body = if req.method() == Method::HEAD { Body::empty() } else { Body::from(manifest) };
    builder.body(body).unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
}

async fn handle_blob(s: &PeerServer, req: &Request, reference: Reference) -> Response<Body> {
    // Admission control: never queue, reject immediately when full.
    let Ok(permit) = Arc::clone(&s.uploads).try_acquire_owned() else {
        tracing::info!(
            max_upload_connections = s.max_upload_connections,
            "max upload connections reached, refusing blob request"
        );
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    };
    let inflight = InflightGuard::new(s.metrics.clone());

    let digest = reference.digest;
    let size = match s.oci.size(&digest).await {
        Ok(size) => size as u64,
        Err(OciError::NotFound(_)) => return status_response(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(digest = %digest, err = %e, "could not determine blob size");
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let range = req
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, size));

    let (status, start, length) = match range {
        None | Some(RangeSpec::Full) => (StatusCode::OK, 0, size),
        Some(RangeSpec::Slice { start, end }) => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        Some(RangeSpec::Unsatisfiable) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .body(Body::empty())
                .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, length)
        .header("Docker-Content-Digest", digest.as_str());
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder
            .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, start + length - 1, size));
    }

    if req.method() == Method::HEAD {
        return builder
            .body(Body::empty())
            .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR));
    }

    let mut reader = match s.oci.get_blob(&digest).await {
        Ok(reader) => reader,
        Err(OciError::NotFound(_)) => return status_response(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(digest = %digest, err = %e, "could not open blob reader");
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    if start > 0 {
        if let Err(e) = reader.seek(std::io::SeekFrom::Start(start)).await {
            tracing::error!(digest = %digest, err = %e, "could not seek blob reader");
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    // The permit and the inflight gauge ride with the stream so the upload
    // slot is held until the body finishes (or the client goes away).
    let stream = limited_stream(reader, Arc::clone(&s.limiter), length, (permit, inflight));
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
}

fn status_response(status: StatusCode) -> Response<Body> {
    status.into_response()
}

struct InflightGuard {
    metrics: Arc<Metrics>,
}

impl InflightGuard {
    fn new(metrics: Arc<Metrics>) -> Self {
        metrics.blob_handler_inflight.inc();
        Self { metrics }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.metrics.blob_handler_inflight.dec();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeSpec {
    Full,
    Slice { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parse a single-range `Range` header against a body of `size` bytes.
/// Multi-range requests fall back to the full body; malformed or
/// non-overlapping ranges are unsatisfiable.
fn parse_range(value: &str, size: u64) -> RangeSpec {
    let Some(spec) = value.strip_prefix("bytes=") else {
        return RangeSpec::Unsatisfiable;
    };
    if spec.contains(',') {
        return RangeSpec::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return RangeSpec::Unsatisfiable;
    };

    if start.is_empty() {
        // Suffix form: the final N bytes.
        let Ok(n) = end.parse::<u64>() else {
            return RangeSpec::Unsatisfiable;
        };
        if n == 0 || size == 0 {
            return RangeSpec::Unsatisfiable;
        }
        return RangeSpec::Slice { start: size.saturating_sub(n), end: size - 1 };
    }

    let Ok(start) = start.parse::<u64>() else {
        return RangeSpec::Unsatisfiable;
    };
    if start >= size {
        return RangeSpec::Unsatisfiable;
    }
    let end = if end.is_empty() {
        size - 1
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            _ => return RangeSpec::Unsatisfiable,
        }
    };
    RangeSpec::Slice { start, end }
}

#[cfg(test)]
#[path = "peer_tests.rs"]
mod tests;
