// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OCI content capability: what the agent needs from the local container
//! runtime, and helpers shared by every implementation.

pub mod containerd;
pub mod image;

pub use image::Image;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};
use tokio::sync::mpsc;

/// Media types the peer server reports for manifest content.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, thiserror::Error)]
pub enum OciError {
    /// The content store does not carry the digest.
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type OciResult<T> = Result<T, OciError>;

/// Runtime image event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageEvent {
    pub image: Image,
    pub event_type: EventType,
}

/// Seekable blob content, so `Range` requests can be served.
pub trait BlobReader: AsyncRead + AsyncSeek + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin> BlobReader for T {}

/// Capability contract against the local container runtime.
#[async_trait]
pub trait OciClient: Send + Sync {
    /// All images whose registry matches the configured registry hosts.
    /// References that start with a raw digest are excluded.
    async fn list_images(&self) -> OciResult<Vec<Image>>;

    /// Subscribe to image events. Both channels close when the subscription
    /// ends; the caller is expected to re-subscribe.
    async fn subscribe(
        &self,
    ) -> OciResult<(mpsc::Receiver<ImageEvent>, mpsc::Receiver<anyhow::Error>)>;

    /// Resolve an image reference to its target digest.
    async fn resolve(&self, reference: &str) -> OciResult<String>;

    /// Size in bytes of the content with the given digest.
    async fn size(&self, digest: &str) -> OciResult<i64>;

    /// Manifest bytes and media type for the given digest.
    async fn get_manifest(&self, digest: &str) -> OciResult<(Vec<u8>, String)>;

    /// Seekable reader over the blob with the given digest.
    async fn get_blob(&self, digest: &str) -> OciResult<Box<dyn BlobReader>>;
}

/// Determine the media type of manifest bytes. Falls back to structural
/// detection for manifests that omit the `mediaType` field.
pub fn determine_media_type(manifest: &[u8]) -> anyhow::Result<String> {
    let value: serde_json::Value =
        serde_json::from_slice(manifest).map_err(|e| anyhow::anyhow!("parse manifest: {e}"))?;
    if let Some(mt) = value.get("mediaType").and_then(|v| v.as_str()) {
        return Ok(mt.to_owned());
    }
    if value.get("manifests").is_some() {
        return Ok(MEDIA_TYPE_OCI_INDEX.to_owned());
    }
    if value.get("config").is_some() && value.get("layers").is_some() {
        return Ok(MEDIA_TYPE_OCI_MANIFEST.to_owned());
    }
    anyhow::bail!("could not determine media type of manifest")
}

/// Expand an image into the digests it contributes: the root manifest, any
/// locally present child manifests, and their configs and layers. Children
/// of an index that are not in the local store are skipped; other agents
/// should not be told this node can serve them.
pub async fn walk_image(client: &dyn OciClient, image: &Image) -> OciResult<Vec<String>> {
    let mut digests = vec![image.digest.clone()];
    let (root, _) = client.get_manifest(&image.digest).await?;
    walk_manifest(client, &root, &mut digests).await?;
    Ok(digests)
}

async fn walk_manifest(
    client: &dyn OciClient,
    manifest: &[u8],
    digests: &mut Vec<String>,
) -> OciResult<()> {
    let value: serde_json::Value = serde_json::from_slice(manifest)
        .map_err(|e| OciError::Other(anyhow::anyhow!("parse manifest: {e}")))?;

    if let Some(children) = value.get("manifests").and_then(|v| v.as_array()) {
        for child in children {
            let Some(digest) = child.get("digest").and_then(|v| v.as_str()) else {
                continue;
            };
            let (bytes, _) = match client.get_manifest(digest).await {
                Ok(found) => found,
                Err(OciError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            digests.push(digest.to_owned());
            Box::pin(walk_manifest(client, &bytes, digests)).await?;
        }
        return Ok(());
    }

    if let Some(config) = value.get("config").and_then(|c| c.get("digest")).and_then(|v| v.as_str())
    {
        digests.push(config.to_owned());
    }
    if let Some(layers) = value.get("layers").and_then(|v| v.as_array()) {
        for layer in layers {
            if let Some(digest) = layer.get("digest").and_then(|v| v.as_str()) {
                digests.push(digest.to_owned());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "walk_tests.rs"]
mod tests;
