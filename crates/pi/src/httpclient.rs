// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retrying HTTP client used for every directory call.
//!
//! Retries transport errors and 5xx responses with exponential backoff under
//! a total deadline; 4xx responses surface immediately, with 404 mapped to a
//! distinct sentinel so callers can treat missing keys as a quiet miss.

use std::time::{Duration, Instant};

use reqwest::{Client, Method, StatusCode};
use tokio_util::sync::CancellationToken;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("404 not found: {0}")]
    NotFound(String),
    #[error("client error {status}: {body}")]
    Client { status: StatusCode, body: String },
    #[error("deadline exceeded after {attempts} attempts (last error: {last})")]
    DeadlineExceeded { attempts: u32, last: String },
    #[error("request cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Send `method url` with optional JSON body, retrying per the contract
/// above. Each attempt is bounded by `min(single_timeout, remaining total)`.
pub async fn do_request_with_retry(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<serde_json::Value>,
    single_timeout: Duration,
    total_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, HttpError> {
    let deadline = Instant::now() + total_timeout;
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts: u32 = 0;
    let mut last_err = String::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HttpError::DeadlineExceeded { attempts, last: last_err });
        }
        attempts += 1;

        let mut req = client
            .request(method.clone(), url)
            .timeout(single_timeout.min(remaining))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &body {
            req = req.json(body);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(HttpError::Cancelled { attempts }),
            result = req.send() => result,
        };

        match result {
            Err(e) => {
                tracing::warn!(url, attempt = attempts, err = %e, "http request failed");
                last_err = e.to_string();
            }
            Ok(resp) if resp.status().is_server_error() => {
                tracing::warn!(url, attempt = attempts, status = %resp.status(), "http request got 5xx");
                last_err = format!("server error: {}", resp.status());
            }
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                let body = resp.text().await.unwrap_or_default();
                return Err(HttpError::NotFound(format!("url: {url}, body: {body}")));
            }
            Ok(resp) if resp.status().is_client_error() => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(HttpError::Client { status, body });
            }
            Ok(resp) => return Ok(resp),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HttpError::DeadlineExceeded { attempts, last: last_err });
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(HttpError::Cancelled { attempts }),
            _ = tokio::time::sleep(backoff.min(remaining)) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
#[path = "httpclient_tests.rs"]
mod tests;
