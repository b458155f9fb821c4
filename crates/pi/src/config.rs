// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the pi agent.
#[derive(Debug, Clone, clap::Args)]
pub struct AgentConfig {
    /// Address to serve the mirror registry on. Local containerd pulls are
    /// pointed here.
    #[arg(long, env = "REGISTRY_ADDR")]
    pub registry_listen_addr: String,

    /// Address to serve downloads for other pi agents on. Other agents pull
    /// manifests and blobs from this address.
    #[arg(long, env = "PI_ADDR")]
    pub pi_listen_addr: String,

    /// Address to serve metrics on.
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_listen_addr: String,

    /// Endpoint of the containerd service.
    #[arg(long, default_value = "/run/containerd/containerd.sock", env = "CONTAINERD_SOCK")]
    pub containerd_sock: String,

    /// Containerd namespace to fetch images from.
    #[arg(long, default_value = "k8s.io", env = "CONTAINERD_NAMESPACE")]
    pub containerd_namespace: String,

    /// Path to the containerd content store, used to stream blobs directly
    /// from disk.
    #[arg(
        long,
        default_value = "/var/lib/containerd/io.containerd.content.v1.content",
        env = "CONTAINERD_CONTENT_PATH"
    )]
    pub containerd_content_path: String,

    /// Registries that are configured to be mirrored (repeatable).
    #[arg(long, required = true, env = "REGISTRIES", value_delimiter = ',')]
    pub registries: Vec<String>,

    /// Piccolo API URL for central service discovery.
    #[arg(long, env = "PICCOLO_ADDRESS")]
    pub piccolo_api: String,

    /// The pi group name; agents only discover other agents in the same
    /// group.
    #[arg(long, env = "PI_GROUP")]
    pub group: String,

    /// Push the full local image state to piccolo every this many minutes.
    #[arg(long, env = "PI_REFRESH_MINUTES")]
    pub full_refresh_minutes: u64,

    /// Max concurrent connections used to upload blobs to other peers.
    #[arg(long, default_value_t = 5, env = "MAX_UPLOAD_CONNECTIONS")]
    pub max_upload_connections: usize,

    /// Max upload speed for blobs served to other pi nodes, in bytes per
    /// second.
    #[arg(long, default_value_t = 1_073_741_824, env = "PI_MAX_UPLOAD_BLOB_BYTES_PER_SECOND")]
    pub max_upload_blob_bytes_per_second: u32,

    /// Max duration spent finding a mirror, in milliseconds.
    #[arg(long = "mirror-resolve-timeout", default_value_t = 20, env = "MIRROR_RESOLVE_TIMEOUT")]
    pub mirror_resolve_timeout_ms: u64,

    /// Max amount of mirrors to attempt per request.
    #[arg(long, default_value_t = 3, env = "MIRROR_RESOLVE_RETRIES")]
    pub mirror_resolve_retries: usize,

    /// When true, latest tags are resolved to digests and mirrored.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "RESOLVE_LATEST_TAG")]
    pub resolve_latest_tag: bool,
}

impl AgentConfig {
    pub fn mirror_resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.mirror_resolve_timeout_ms)
    }

    pub fn full_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.full_refresh_minutes * 60)
    }

    /// Hostnames of the mirrored registries, with URL schemes stripped.
    pub fn registry_hosts(&self) -> Vec<String> {
        self.registries
            .iter()
            .map(|r| {
                r.trim_start_matches("https://").trim_start_matches("http://").trim_end_matches('/').to_owned()
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
