// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Row models and wire types for the directory API.

use serde::{Deserialize, Serialize};

/// A `(group, key, holder)` tuple in `distribution_tab`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DistributionRow {
    pub id: i64,
    pub key: String,
    pub holder: String,
    pub group: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A `(group, host_addr)` liveness row in `host_tab`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HostRow {
    pub id: i64,
    pub host_addr: String,
    pub group: String,
    pub last_seen: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Body of `POST /api/v1/distribution/advertise` and `/sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiseRequest {
    pub holder: String,
    pub group: String,
    pub keys: Vec<String>,
}

/// Envelope returned by the write endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

/// Query parameters of `GET /api/v1/distribution/findkey`.
#[derive(Debug, Clone, Deserialize)]
pub struct FindKeyQuery {
    pub group: String,
    pub key: String,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub request_host: String,
}

/// Body of a successful findkey response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindKeyResponse {
    pub key: String,
    pub group: String,
    pub holders: Vec<String>,
    pub total: usize,
}

/// Body of `POST /api/v1/keepalive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    pub host: String,
    pub group: String,
}

/// Return current epoch millis.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
