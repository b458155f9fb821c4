// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the directory API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::ApiError;
use crate::locality::sort_by_lcp_v4;
use crate::model::{AdvertiseRequest, ApiResponse, FindKeyQuery, FindKeyResponse, KeepAliveRequest};
use crate::AppState;

/// Default findkey result count when the query does not specify one.
const DEFAULT_FIND_KEY_COUNT: usize = 100;

/// Build the axum `Router` with all directory routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/v1/keepalive", post(keep_alive))
        .route("/api/v1/distribution/advertise", post(advertise))
        .route("/api/v1/distribution/sync", post(sync))
        .route("/api/v1/distribution/findkey", get(find_key))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), track_metrics))
        .with_state(state)
}

/// Record request count and latency per route/method/status.
async fn track_metrics(State(s): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().clone();

    let start = Instant::now();
    let resp = next.run(req).await;

    s.metrics
        .http_requests_total
        .with_label_values(&[&route, method.as_str(), resp.status().as_str()])
        .inc();
    s.metrics
        .http_request_duration
        .with_label_values(&[&route, method.as_str()])
        .observe(start.elapsed().as_secs_f64());
    resp
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "ok" }))
}

async fn metrics(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], s.metrics.render())
}

/// `POST /api/v1/distribution/advertise` — upsert-ignore the holder's keys.
async fn advertise(
    State(s): State<Arc<AppState>>,
    Json(req): Json<AdvertiseRequest>,
) -> Response {
    if req.holder.is_empty() {
        return ApiError::BadRequest.to_http_response("holder is empty!").into_response();
    }

    let keys: Vec<String> = req.keys.iter().filter(|k| !k.is_empty()).cloned().collect();
    if keys.is_empty() {
        return ApiError::BadRequest.to_http_response("no operation needed").into_response();
    }

    if let Err(e) = s.store.create_distributions(&req.group, &req.holder, &keys).await {
        tracing::error!(holder = %req.holder, count = keys.len(), err = %e, "failed to create distributions");
        return ApiError::Internal
            .to_http_response(format!("error when creating distributions: {e}"))
            .into_response();
    }

    tracing::info!(holder = %req.holder, group = %req.group, count = keys.len(), "distributions created");
    (
        StatusCode::CREATED,
        Json(ApiResponse { success: true, message: "distribution created".to_owned() }),
    )
        .into_response()
}

/// `POST /api/v1/distribution/sync` — idempotent replacement of the holder's
/// key set: delete keys only in the database, insert keys only in the
/// request.
async fn sync(State(s): State<Arc<AppState>>, Json(req): Json<AdvertiseRequest>) -> Response {
    let start = Instant::now();
    if req.holder.is_empty() {
        return ApiError::BadRequest.to_http_response("holder is empty!").into_response();
    }

    let existing = match s.store.keys_by_holder(&req.group, &req.holder).await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::error!(holder = %req.holder, err = %e, "failed to read existing keys");
            return ApiError::Internal
                .to_http_response("error when reading keys from DB")
                .into_response();
        }
    };

    let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let current: HashSet<&str> =
        req.keys.iter().map(String::as_str).filter(|k| !k.is_empty()).collect();

    let only_in_db: Vec<String> =
        existing.difference(&current).map(|k| (*k).to_owned()).collect();
    let only_in_request: Vec<String> =
        current.difference(&existing).map(|k| (*k).to_owned()).collect();

    if let Err(e) = s.store.delete_keys_by_holder(&req.group, &req.holder, &only_in_db).await {
        tracing::error!(holder = %req.holder, err = %e, "failed to delete stale keys");
        return ApiError::Internal
            .to_http_response("error when deleting keys from DB")
            .into_response();
    }

    if let Err(e) = s.store.create_distributions(&req.group, &req.holder, &only_in_request).await {
        tracing::error!(holder = %req.holder, err = %e, "failed to create distributions");
        return ApiError::Internal
            .to_http_response(format!("error when creating distributions: {e}"))
            .into_response();
    }

    tracing::info!(
        holder = %req.holder,
        group = %req.group,
        duration_seconds = start.elapsed().as_secs_f64(),
        deleted = only_in_db.len(),
        added = only_in_request.len(),
        "holder key set synced"
    );
    (
        StatusCode::CREATED,
        Json(ApiResponse { success: true, message: "distribution synced".to_owned() }),
    )
        .into_response()
}

/// `GET /api/v1/distribution/findkey` — holders for a key, most-local first.
async fn find_key(State(s): State<Arc<AppState>>, Query(req): Query<FindKeyQuery>) -> Response {
    if req.key.is_empty() {
        return ApiError::BadRequest.to_http_response("key is empty!").into_response();
    }

    let holders = match s.store.holders_by_key(&req.group, &req.key).await {
        Ok(holders) => holders,
        Err(e) => {
            tracing::error!(key = %req.key, err = %e, "failed to get holders by key");
            return ApiError::Internal
                .to_http_response(format!("error when finding holders: {e}"))
                .into_response();
        }
    };

    s.metrics.findkey_holder_count.observe(holders.len() as f64);

    if holders.is_empty() {
        return ApiError::KeyNotFound
            .to_http_response(format!("didn't find the key {} in piccolo", req.key))
            .into_response();
    }

    let mut sorted = if req.request_host.is_empty() {
        holders
    } else {
        match sort_by_lcp_v4(&holders, &req.request_host) {
            Ok(sorted) => sorted,
            Err(e) => {
                return ApiError::KeyNotFound
                    .to_http_response(format!("error when sorting holder order: {e}"))
                    .into_response();
            }
        }
    };

    let total = sorted.len();
    let limit = if req.count > 0 { req.count } else { DEFAULT_FIND_KEY_COUNT };
    sorted.truncate(limit);

    tracing::info!(group = %req.group, key = %req.key, from_db = total, returned = sorted.len(), "found holders for key");
    Json(FindKeyResponse { key: req.key, group: req.group, holders: sorted, total })
        .into_response()
}

/// `POST /api/v1/keepalive` — refresh the holder's liveness row.
async fn keep_alive(State(s): State<Arc<AppState>>, Json(req): Json<KeepAliveRequest>) -> Response {
    if req.host.is_empty() {
        return ApiError::BadRequest.to_http_response("host is empty!").into_response();
    }

    if let Err(e) = s.store.refresh_host(&req.group, &req.host).await {
        tracing::error!(host_addr = %req.host, err = %e, "failed to refresh host");
        return ApiError::Internal.to_http_response("failed to keep alive").into_response();
    }

    tracing::info!(host_addr = %req.host, group = %req.group, "keep alive");
    (
        StatusCode::CREATED,
        Json(ApiResponse { success: true, message: "keep alive success".to_owned() }),
    )
        .into_response()
}
