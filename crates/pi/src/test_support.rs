// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared mocks for unit tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::httpclient::HttpError;
use crate::oci::{BlobReader, Image, ImageEvent, OciClient, OciError, OciResult};
use crate::sd::ServiceDiscover;

/// In-memory OCI content store.
#[derive(Default)]
pub struct MockOciClient {
    pub images: Mutex<Vec<Image>>,
    pub manifests: Mutex<HashMap<String, Vec<u8>>>,
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
    pub resolves: Mutex<HashMap<String, String>>,
    subscription: Mutex<Option<(mpsc::Sender<ImageEvent>, mpsc::Sender<anyhow::Error>)>>,
}

impl MockOciClient {
    pub fn put_image(&self, image: Image) {
        self.images.lock().unwrap().push(image);
    }

    pub fn put_manifest(&self, digest: &str, bytes: Vec<u8>) {
        self.manifests.lock().unwrap().insert(digest.to_owned(), bytes);
    }

    pub fn put_blob(&self, digest: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(digest.to_owned(), bytes);
    }

    pub fn put_resolve(&self, reference: &str, digest: &str) {
        self.resolves.lock().unwrap().insert(reference.to_owned(), digest.to_owned());
    }

    /// Push an event into the currently open subscription.
    pub async fn send_event(&self, event: ImageEvent) {
        let tx = {
            let sub = self.subscription.lock().unwrap();
            sub.as_ref().map(|(events, _)| events.clone())
        };
        tx.expect("no open subscription").send(event).await.expect("subscription closed");
    }

    /// Drop the subscription senders, closing both channels.
    pub fn close_subscription(&self) {
        self.subscription.lock().unwrap().take();
    }
}

#[async_trait]
impl OciClient for MockOciClient {
    async fn list_images(&self) -> OciResult<Vec<Image>> {
        Ok(self.images.lock().unwrap().clone())
    }

    async fn subscribe(
        &self,
    ) -> OciResult<(mpsc::Receiver<ImageEvent>, mpsc::Receiver<anyhow::Error>)> {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = mpsc::channel(16);
        *self.subscription.lock().unwrap() = Some((event_tx, err_tx));
        Ok((event_rx, err_rx))
    }

    async fn resolve(&self, reference: &str) -> OciResult<String> {
        self.resolves
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| OciError::NotFound(reference.to_owned()))
    }

    async fn size(&self, digest: &str) -> OciResult<i64> {
        let blobs = self.blobs.lock().unwrap();
        if let Some(blob) = blobs.get(digest) {
            return Ok(blob.len() as i64);
        }
        let manifests = self.manifests.lock().unwrap();
        manifests
            .get(digest)
            .map(|m| m.len() as i64)
            .ok_or_else(|| OciError::NotFound(digest.to_owned()))
    }

    async fn get_manifest(&self, digest: &str) -> OciResult<(Vec<u8>, String)> {
        let bytes = self
            .manifests
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .ok_or_else(|| OciError::NotFound(digest.to_owned()))?;
        let media_type = crate::oci::determine_media_type(&bytes)?;
        Ok((bytes, media_type))
    }

    async fn get_blob(&self, digest: &str) -> OciResult<Box<dyn BlobReader>> {
        let bytes = self
            .blobs
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .ok_or_else(|| OciError::NotFound(digest.to_owned()))?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }
}

/// Directory stand-in that records every call.
#[derive(Default)]
pub struct MockServiceDiscover {
    pub holders: Mutex<Vec<SocketAddr>>,
    pub advertised: Mutex<Vec<Vec<String>>>,
    pub synced: Mutex<Vec<Vec<String>>>,
    pub keepalives: AtomicU32,
    pub resolve_calls: AtomicU32,
}

#[async_trait]
impl ServiceDiscover for MockServiceDiscover {
    async fn resolve(&self, _key: &str, _count: usize) -> Result<Vec<SocketAddr>, HttpError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.holders.lock().unwrap().clone())
    }

    async fn advertise(&self, keys: &[String]) -> Result<(), HttpError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        self.advertised.lock().unwrap().push(sorted);
        Ok(())
    }

    async fn sync(&self, keys: &[String]) -> Result<(), HttpError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        self.synced.lock().unwrap().push(sorted);
        Ok(())
    }

    async fn keep_alive(&self) -> Result<(), HttpError> {
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
