// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State tracker: keeps the directory's view of this agent's local keys in
//! agreement with containerd.
//!
//! Three cooperating activities: an event loop advertising new images as
//! they land, a coalescing processor that folds bursts of full-sync
//! requests into single syncs, and a keep-alive heartbeat.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::oci::{walk_image, EventType, Image, OciClient};
use crate::sd::ServiceDiscover;

/// A burst of full-sync requests is folded into one sync after this long.
pub const FULL_UPDATE_WAIT: Duration = Duration::from_secs(60);
/// ... or once this many requests have buffered, whichever comes first.
pub const MAX_DELETION_EVENTS: usize = 100;
/// Keep-alive heartbeat period.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Pause before re-subscribing after the event stream ends.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(3);

pub struct Tracker {
    oci: Arc<dyn OciClient>,
    sd: Arc<dyn ServiceDiscover>,
    metrics: Arc<Metrics>,
    resolve_latest_tag: bool,
    full_refresh_interval: Duration,
}

impl Tracker {
    pub fn new(
        oci: Arc<dyn OciClient>,
        sd: Arc<dyn ServiceDiscover>,
        metrics: Arc<Metrics>,
        resolve_latest_tag: bool,
        full_refresh_interval: Duration,
    ) -> Self {
        Self { oci, sd, metrics, resolve_latest_tag, full_refresh_interval }
    }

    /// Run the tracker until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            full_refresh_minutes = self.full_refresh_interval.as_secs() / 60,
            "starting state tracker"
        );

        let (full_updates_tx, full_updates_rx) = mpsc::channel::<&'static str>(10);
        // Publish the full local state as soon as the agent starts.
        let _ = full_updates_tx.send("pi-start").await;

        {
            let tracker = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { tracker.full_update_processor(full_updates_rx, shutdown).await });
        }
        {
            let tracker = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let tx = full_updates_tx.clone();
            tokio::spawn(async move { tracker.interval_sync(tx, shutdown).await });
        }
        {
            let tracker = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { tracker.keep_alive_loop(shutdown).await });
        }

        self.event_loop(full_updates_tx, shutdown).await;
        Ok(())
    }

    /// Subscribe to runtime image events, re-subscribing with a delay
    /// whenever the stream ends.
    pub(crate) async fn event_loop(
        &self,
        full_updates_tx: mpsc::Sender<&'static str>,
        shutdown: CancellationToken,
    ) {
        loop {
            match self.oci.subscribe().await {
                Err(e) => {
                    self.metrics.containerd_subscribe_total.with_label_values(&["fail"]).inc();
                    tracing::error!(err = %e, "subscribing to containerd events failed, restarting tracker");
                }
                Ok((mut events, mut errors)) => {
                    self.metrics.containerd_subscribe_total.with_label_values(&["success"]).inc();
                    tracing::info!("subscribed to containerd events");

                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            event = events.recv() => {
                                let Some(event) = event else {
                                    tracing::info!("event channel closed, restarting subscriber");
                                    break;
                                };
                                self.handle_event(event, &full_updates_tx).await;
                            }
                            err = errors.recv() => {
                                let Some(err) = err else {
                                    tracing::info!("error channel closed, restarting subscriber");
                                    break;
                                };
                                tracing::error!(err = %err, "event channel error, restarting subscriber");
                                break;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    async fn handle_event(
        &self,
        event: crate::oci::ImageEvent,
        full_updates_tx: &mpsc::Sender<&'static str>,
    ) {
        tracing::info!(image = %event.image, event_type = %event.event_type, "received image event");
        self.metrics
            .containerd_subscribe_event_total
            .with_label_values(&[&event.event_type.to_string()])
            .inc();

        // A delete event does not say which keys became orphaned; only a
        // full list sync can, so request one.
        if event.event_type == EventType::Delete {
            let _ = full_updates_tx.send("delete-event").await;
            return;
        }

        match self.image_keys(&event.image).await {
            Ok(keys) => {
                if let Err(e) = self.sd.advertise(&keys).await {
                    tracing::error!(image = %event.image, err = %e, "advertise failed, next full sync will repair");
                }
            }
            Err(e) => {
                tracing::error!(image = %event.image, err = %e, "walking image failed");
            }
        }
    }

    /// The keys one image contributes: its tag reference (unless filtered)
    /// plus every digest it references.
    async fn image_keys(&self, image: &Image) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        if !(image.is_latest_tag() && !self.resolve_latest_tag) {
            if let Some(tag_name) = image.tag_name() {
                keys.push(tag_name);
            }
        }
        let digests = walk_image(self.oci.as_ref(), image).await?;
        keys.extend(digests);
        Ok(keys)
    }

    /// Buffer full-sync requests and run one sync per burst: when the
    /// buffer reaches `MAX_DELETION_EVENTS`, or `FULL_UPDATE_WAIT` after
    /// the first buffered request.
    pub(crate) async fn full_update_processor(
        &self,
        mut requests: mpsc::Receiver<&'static str>,
        shutdown: CancellationToken,
    ) {
        let mut buffered: usize = 0;
        let mut deadline = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                request = requests.recv() => {
                    let Some(request) = request else { return };
                    buffered += 1;
                    if buffered == 1 {
                        deadline = Instant::now() + FULL_UPDATE_WAIT;
                    }
                    if buffered >= MAX_DELETION_EVENTS {
                        tracing::info!(buffered, reason = request, "full sync triggered by buffered request count");
                        self.flush(&mut buffered).await;
                    }
                }
                _ = tokio::time::sleep_until(deadline), if buffered > 0 => {
                    tracing::info!(buffered, "full sync triggered by wait time since first request");
                    self.flush(&mut buffered).await;
                }
            }
        }
    }

    async fn flush(&self, buffered: &mut usize) {
        if let Err(e) = self.full_sync().await {
            tracing::error!(err = %e, "full sync failed, next interval sync will retry");
        }
        *buffered = 0;
    }

    /// List all local images and replace this agent's advertised key set.
    pub async fn full_sync(&self) -> anyhow::Result<()> {
        let images = self.oci.list_images().await?;
        tracing::debug!(count = images.len(), "full sync listing images");

        self.metrics.reset_advertised();

        // key -> registry, deduplicating digests shared between images.
        let mut keys: HashMap<String, String> = HashMap::new();
        let mut walked: HashSet<String> = HashSet::new();
        let mut errors: Vec<anyhow::Error> = Vec::new();

        for image in &images {
            match image.tag_name() {
                Some(tag_name) => {
                    if !(image.is_latest_tag() && !self.resolve_latest_tag) {
                        keys.insert(tag_name, image.registry.clone());
                        self.metrics
                            .advertised_image_tags
                            .with_label_values(&[&image.registry])
                            .inc();
                    }
                }
                None => {
                    self.metrics
                        .advertised_image_digests
                        .with_label_values(&[&image.registry])
                        .inc();
                }
            }

            if walked.insert(image.digest.clone()) {
                match walk_image(self.oci.as_ref(), image).await {
                    Ok(digests) => {
                        for digest in digests {
                            keys.insert(digest, image.registry.clone());
                        }
                    }
                    Err(e) => errors.push(e.into()),
                }
            }
            self.metrics.advertised_images.with_label_values(&[&image.registry]).inc();
        }

        let key_list: Vec<String> = keys.keys().cloned().collect();
        for registry in keys.values() {
            self.metrics.advertised_keys.with_label_values(&[registry]).inc();
        }

        tracing::info!(total_keys = key_list.len(), "syncing full image state");
        self.sd.sync(&key_list).await?;

        if let Some(e) = errors.pop() {
            return Err(e.context(format!("{} images failed to walk", errors.len() + 1)));
        }
        Ok(())
    }

    /// Trigger a full sync on a fixed interval, starting at a uniformly
    /// random offset so agents do not sync in lockstep.
    pub(crate) async fn interval_sync(
        &self,
        full_updates_tx: mpsc::Sender<&'static str>,
        shutdown: CancellationToken,
    ) {
        let initial = rand::thread_rng().gen_range(Duration::ZERO..self.full_refresh_interval);
        tracing::info!(delay_secs = initial.as_secs(), "interval sync first trigger delayed");
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(initial) => {}
        }

        let _ = full_updates_tx.send("ticker").await;

        let mut timer = tokio::time::interval(self.full_refresh_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.reset();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = timer.tick() => {
                    tracing::info!("interval sync requesting scheduled full sync");
                    let _ = full_updates_tx.send("ticker").await;
                }
            }
        }
    }

    /// Heartbeat the directory so this holder is not evicted, starting at a
    /// uniformly random offset.
    pub(crate) async fn keep_alive_loop(&self, shutdown: CancellationToken) {
        let initial = rand::thread_rng().gen_range(Duration::ZERO..KEEP_ALIVE_INTERVAL);
        tracing::info!(delay_secs = initial.as_secs(), "first keep-alive delayed");
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(initial) => {}
        }

        if let Err(e) = self.sd.keep_alive().await {
            tracing::error!(err = %e, "keep-alive failed");
        }

        let mut timer = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.reset();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = timer.tick() => {
                    if let Err(e) = self.sd.keep_alive().await {
                        tracing::error!(err = %e, "keep-alive failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
