// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service discovery client against the piccolo directory.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tokio_util::sync::CancellationToken;

use piccolo::model::{AdvertiseRequest, FindKeyResponse, KeepAliveRequest};

use crate::httpclient::{do_request_with_retry, HttpError};
use crate::metrics::Metrics;

/// Capability contract against the central directory.
#[async_trait]
pub trait ServiceDiscover: Send + Sync {
    /// Holders of `key`, most-local first, at most `count`.
    async fn resolve(&self, key: &str, count: usize) -> Result<Vec<SocketAddr>, HttpError>;

    /// Add `keys` to this agent's advertised set.
    async fn advertise(&self, keys: &[String]) -> Result<(), HttpError>;

    /// Replace this agent's advertised set with `keys`.
    async fn sync(&self, keys: &[String]) -> Result<(), HttpError>;

    /// Refresh this agent's liveness row.
    async fn keep_alive(&self) -> Result<(), HttpError>;
}

/// Directory client carrying this agent's identity (peer address and group).
pub struct PiccoloClient {
    base_url: String,
    pi_addr: String,
    group: String,
    client: reqwest::Client,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl PiccoloClient {
    pub fn new(
        base_url: &str,
        pi_addr: &str,
        group: &str,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            pi_addr: pi_addr.to_owned(),
            group: group.to_owned(),
            client,
            cancel,
            metrics,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The agent's own IPv4, sent so findkey can rank holders by locality.
    fn request_host(&self) -> &str {
        self.pi_addr.split(':').next().unwrap_or_default()
    }
}

#[async_trait]
impl ServiceDiscover for PiccoloClient {
    async fn resolve(&self, key: &str, count: usize) -> Result<Vec<SocketAddr>, HttpError> {
        let count = count.to_string();
        let url = reqwest::Url::parse_with_params(
            &self.url("/api/v1/distribution/findkey"),
            &[
                ("group", self.group.as_str()),
                ("key", key),
                ("count", count.as_str()),
                ("request_host", self.request_host()),
            ],
        )
        .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;

        let timer = self.metrics.resolve_duration.start_timer();
        let resp = do_request_with_retry(
            &self.client,
            Method::GET,
            url.as_str(),
            None,
            Duration::from_secs(1),
            Duration::from_secs(3),
            &self.cancel,
        )
        .await;
        timer.observe_duration();
        let resp = resp?;

        let body: FindKeyResponse = resp.json().await?;
        let mut peers = Vec::with_capacity(body.holders.len());
        for holder in &body.holders {
            match holder.parse::<SocketAddr>() {
                Ok(addr) => peers.push(addr),
                Err(e) => {
                    tracing::warn!(holder = %holder, err = %e, "skipping unparsable holder address")
                }
            }
        }
        tracing::debug!(key, peers = ?peers, "resolve done");
        Ok(peers)
    }

    async fn advertise(&self, keys: &[String]) -> Result<(), HttpError> {
        let request = AdvertiseRequest {
            holder: self.pi_addr.clone(),
            group: self.group.clone(),
            keys: keys.to_vec(),
        };
        tracing::info!(count = keys.len(), "advertise keys");
        do_request_with_retry(
            &self.client,
            Method::POST,
            &self.url("/api/v1/distribution/advertise"),
            Some(serde_json::to_value(&request)?),
            Duration::from_secs(1),
            Duration::from_secs(60),
            &self.cancel,
        )
        .await?;
        Ok(())
    }

    async fn sync(&self, keys: &[String]) -> Result<(), HttpError> {
        let request = AdvertiseRequest {
            holder: self.pi_addr.clone(),
            group: self.group.clone(),
            keys: keys.to_vec(),
        };
        tracing::info!(count = keys.len(), "sync keys");
        do_request_with_retry(
            &self.client,
            Method::POST,
            &self.url("/api/v1/distribution/sync"),
            Some(serde_json::to_value(&request)?),
            Duration::from_secs(1),
            Duration::from_secs(90),
            &self.cancel,
        )
        .await?;
        Ok(())
    }

    async fn keep_alive(&self) -> Result<(), HttpError> {
        let request =
            KeepAliveRequest { host: self.pi_addr.clone(), group: self.group.clone() };
        do_request_with_retry(
            &self.client,
            Method::POST,
            &self.url("/api/v1/keepalive"),
            Some(serde_json::to_value(&request)?),
            Duration::from_secs(1),
            Duration::from_secs(30),
            &self.cancel,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "sd_tests.rs"]
mod tests;
