// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Containerd-backed implementation of the OCI capability.
//!
//! Metadata (image list, events, content info) goes over the containerd
//! gRPC API; blob bytes are read straight from the content store on disk,
//! which is what makes range requests cheap.

use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use containerd_client::services::v1::{
    content_client::ContentClient, events_client::EventsClient, images_client::ImagesClient,
    version_client::VersionClient, GetImageRequest, ImageCreate, ImageDelete, ImageUpdate,
    InfoRequest, ListImagesRequest, ReadContentRequest, SubscribeRequest,
};
use containerd_client::with_namespace;
use prost::Message as _;
use tokio::sync::mpsc;
use tonic::transport::Channel;
use tonic::Code;
use tonic::Request;

use super::{
    determine_media_type, BlobReader, EventType, Image, ImageEvent, OciClient, OciError, OciResult,
};

pub struct Containerd {
    channel: Channel,
    namespace: String,
    content_path: PathBuf,
    list_filter: String,
    event_filter: String,
}

impl Containerd {
    /// Connect to containerd over its unix socket. Fails fast when the
    /// socket is unreachable; a node without containerd cannot mirror.
    pub async fn connect(
        sock: &str,
        namespace: &str,
        content_path: &str,
        registry_hosts: &[String],
    ) -> anyhow::Result<Self> {
        let channel = containerd_client::connect(sock)
            .await
            .with_context(|| format!("connect to containerd at {sock}"))?;

        let (list_filter, event_filter) = create_filters(registry_hosts);
        tracing::info!(list_filter, event_filter, "containerd client created");

        let client = Self {
            channel,
            namespace: namespace.to_owned(),
            content_path: PathBuf::from(content_path),
            list_filter,
            event_filter,
        };
        client.verify().await?;
        Ok(client)
    }

    async fn verify(&self) -> anyhow::Result<()> {
        let mut version = VersionClient::new(self.channel.clone());
        let resp = version.version(()).await.context("query containerd version")?;
        let info = resp.into_inner();
        tracing::info!(version = %info.version, revision = %info.revision, "containerd reachable");
        Ok(())
    }

    fn blob_path(&self, digest: &str) -> OciResult<PathBuf> {
        let (algorithm, encoded) = digest
            .split_once(':')
            .ok_or_else(|| OciError::Other(anyhow::anyhow!("malformed digest {digest:?}")))?;
        Ok(self.content_path.join("blobs").join(algorithm).join(encoded))
    }

    /// Read full content bytes over the content service.
    async fn read_content(&self, digest: &str) -> OciResult<Vec<u8>> {
        let mut content = ContentClient::new(self.channel.clone());
        let req = ReadContentRequest { digest: digest.to_owned(), offset: 0, size: 0 };
        let resp = content
            .read(with_namespace!(req, self.namespace))
            .await
            .map_err(|status| status_to_error(status, digest))?;

        let mut stream = resp.into_inner();
        let mut bytes = Vec::new();
        loop {
            match stream.message().await {
                Ok(Some(chunk)) => bytes.extend_from_slice(&chunk.data),
                Ok(None) => break,
                Err(status) => return Err(status_to_error(status, digest)),
            }
        }
        Ok(bytes)
    }
}

#[async_trait]
impl OciClient for Containerd {
    async fn list_images(&self) -> OciResult<Vec<Image>> {
        let mut images = ImagesClient::new(self.channel.clone());
        let req = ListImagesRequest { filters: vec![self.list_filter.clone()] };
        let resp = images
            .list(with_namespace!(req, self.namespace))
            .await
            .map_err(|status| OciError::Other(anyhow::anyhow!("list images: {status}")))?;

        let mut parsed = Vec::new();
        for image in resp.into_inner().images {
            // References that are raw digests carry no name worth
            // advertising.
            if image.name.starts_with("sha256") {
                continue;
            }
            let digest = image.target.as_ref().map(|t| t.digest.clone()).unwrap_or_default();
            parsed.push(Image::parse(&image.name, &digest)?);
        }
        Ok(parsed)
    }

    async fn subscribe(
        &self,
    ) -> OciResult<(mpsc::Receiver<ImageEvent>, mpsc::Receiver<anyhow::Error>)> {
        let mut events_client = EventsClient::new(self.channel.clone());
        let req = SubscribeRequest { filters: vec![self.event_filter.clone()] };
        let resp = events_client
            .subscribe(with_namespace!(req, self.namespace))
            .await
            .map_err(|status| OciError::Other(anyhow::anyhow!("subscribe to events: {status}")))?;
        let mut stream = resp.into_inner();

        let (event_tx, event_rx) = mpsc::channel(32);
        let (err_tx, err_rx) = mpsc::channel(8);
        let channel = self.channel.clone();
        let namespace = self.namespace.clone();

        tokio::spawn(async move {
            loop {
                let envelope = match stream.message().await {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => break,
                    Err(status) => {
                        let _ = err_tx.send(anyhow::anyhow!("event stream: {status}")).await;
                        break;
                    }
                };

                match decode_event(&channel, &namespace, &envelope.topic, envelope.event.as_ref())
                    .await
                {
                    Ok(Some(event)) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        if err_tx.send(e).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok((event_rx, err_rx))
    }

    async fn resolve(&self, reference: &str) -> OciResult<String> {
        let mut images = ImagesClient::new(self.channel.clone());
        let req = GetImageRequest { name: reference.to_owned() };
        let resp = images
            .get(with_namespace!(req, self.namespace))
            .await
            .map_err(|status| status_to_error(status, reference))?;

        resp.into_inner()
            .image
            .and_then(|image| image.target)
            .map(|target| target.digest)
            .ok_or_else(|| OciError::NotFound(reference.to_owned()))
    }

    async fn size(&self, digest: &str) -> OciResult<i64> {
        let mut content = ContentClient::new(self.channel.clone());
        let req = InfoRequest { digest: digest.to_owned() };
        let resp = content
            .info(with_namespace!(req, self.namespace))
            .await
            .map_err(|status| status_to_error(status, digest))?;

        resp.into_inner()
            .info
            .map(|info| info.size)
            .ok_or_else(|| OciError::NotFound(digest.to_owned()))
    }

    async fn get_manifest(&self, digest: &str) -> OciResult<(Vec<u8>, String)> {
        let bytes = self.read_content(digest).await?;
        let media_type = determine_media_type(&bytes)?;
        Ok((bytes, media_type))
    }

    async fn get_blob(&self, digest: &str) -> OciResult<Box<dyn BlobReader>> {
        let path = self.blob_path(digest)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OciError::NotFound(digest.to_owned()))
            }
            Err(e) => Err(OciError::Other(
                anyhow::Error::new(e).context(format!("open blob {}", path.display())),
            )),
        }
    }
}

/// Decode one event envelope into an image event, fetching the image's
/// current digest for create and update topics.
async fn decode_event(
    channel: &Channel,
    namespace: &str,
    topic: &str,
    event: Option<&prost_types::Any>,
) -> anyhow::Result<Option<ImageEvent>> {
    let Some(any) = event else { return Ok(None) };

    let (name, event_type) = match topic {
        "/images/create" => {
            let e = ImageCreate::decode(any.value.as_slice())
                .context("decode image create event")?;
            (e.name, EventType::Create)
        }
        "/images/update" => {
            let e = ImageUpdate::decode(any.value.as_slice())
                .context("decode image update event")?;
            (e.name, EventType::Update)
        }
        "/images/delete" => {
            let e = ImageDelete::decode(any.value.as_slice())
                .context("decode image delete event")?;
            (e.name, EventType::Delete)
        }
        other => {
            tracing::debug!(topic = other, "ignoring unsupported event topic");
            return Ok(None);
        }
    };

    let image = match event_type {
        EventType::Delete => Image::parse(&name, "")?,
        EventType::Create | EventType::Update => {
            let mut images = ImagesClient::new(channel.clone());
            let req = GetImageRequest { name: name.clone() };
            let resp = images
                .get(with_namespace!(req, namespace))
                .await
                .with_context(|| format!("get image {name}"))?;
            let digest = resp
                .into_inner()
                .image
                .and_then(|image| image.target)
                .map(|target| target.digest)
                .unwrap_or_default();
            Image::parse(&name, &digest)?
        }
    };

    Ok(Some(ImageEvent { image, event_type }))
}

fn status_to_error(status: tonic::Status, what: &str) -> OciError {
    if status.code() == Code::NotFound {
        OciError::NotFound(what.to_owned())
    } else {
        OciError::Other(anyhow::anyhow!("{what}: {status}"))
    }
}

/// Containerd filter expressions limiting images and events to the mirrored
/// registries.
fn create_filters(registry_hosts: &[String]) -> (String, String) {
    let escaped: Vec<String> =
        registry_hosts.iter().map(|host| host.replace('.', "\\\\.")).collect();
    let list_filter = format!(r#"name~="^({})/""#, escaped.join("|"));
    let event_filter = format!(
        r#"topic~="/images/create|/images/update|/images/delete",event.{list_filter}"#
    );
    (list_filter, event_filter)
}

#[cfg(test)]
#[path = "containerd_tests.rs"]
mod tests;
