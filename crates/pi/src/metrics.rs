// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus metrics for the pi agent.

use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// All agent metrics plus the registry they are registered on.
///
/// Constructed once at startup and passed around as a handle.
pub struct Metrics {
    pub registry: Registry,
    pub containerd_subscribe_total: IntCounterVec,
    pub containerd_subscribe_event_total: IntCounterVec,
    pub advertised_keys: IntGaugeVec,
    pub advertised_images: IntGaugeVec,
    pub advertised_image_tags: IntGaugeVec,
    pub advertised_image_digests: IntGaugeVec,
    pub mirror_requests_total: IntCounterVec,
    pub resolve_duration: Histogram,
    pub blob_handler_inflight: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let containerd_subscribe_total = IntCounterVec::new(
            Opts::new(
                "pi_containerd_subscribe_total",
                "Total number of containerd event subscriptions.",
            ),
            &["status"],
        )?;
        let containerd_subscribe_event_total = IntCounterVec::new(
            Opts::new(
                "pi_containerd_subscribe_event_total",
                "Total number of image events received from containerd.",
            ),
            &["type"],
        )?;
        let advertised_keys = IntGaugeVec::new(
            Opts::new("pi_advertised_keys", "Keys advertised in the last full sync."),
            &["registry"],
        )?;
        let advertised_images = IntGaugeVec::new(
            Opts::new("pi_advertised_images", "Images advertised in the last full sync."),
            &["registry"],
        )?;
        let advertised_image_tags = IntGaugeVec::new(
            Opts::new("pi_advertised_image_tags", "Image tags advertised in the last full sync."),
            &["registry"],
        )?;
        let advertised_image_digests = IntGaugeVec::new(
            Opts::new(
                "pi_advertised_image_digests",
                "Image digest references advertised in the last full sync.",
            ),
            &["registry"],
        )?;
        let mirror_requests_total = IntCounterVec::new(
            Opts::new("pi_mirror_requests_total", "Total number of mirror requests."),
            &["registry", "cache", "kind"],
        )?;
        let resolve_duration = Histogram::with_opts(HistogramOpts::new(
            "pi_resolve_duration_seconds",
            "Duration of findkey calls against the directory.",
        ))?;
        let blob_handler_inflight =
            IntGauge::new("pi_blob_handler_inflight", "Blob uploads currently being served.")?;

        registry.register(Box::new(containerd_subscribe_total.clone()))?;
        registry.register(Box::new(containerd_subscribe_event_total.clone()))?;
        registry.register(Box::new(advertised_keys.clone()))?;
        registry.register(Box::new(advertised_images.clone()))?;
        registry.register(Box::new(advertised_image_tags.clone()))?;
        registry.register(Box::new(advertised_image_digests.clone()))?;
        registry.register(Box::new(mirror_requests_total.clone()))?;
        registry.register(Box::new(resolve_duration.clone()))?;
        registry.register(Box::new(blob_handler_inflight.clone()))?;

        Ok(Self {
            registry,
            containerd_subscribe_total,
            containerd_subscribe_event_total,
            advertised_keys,
            advertised_images,
            advertised_image_tags,
            advertised_image_digests,
            mirror_requests_total,
            resolve_duration,
            blob_handler_inflight,
        })
    }

    /// Reset the per-registry advertisement gauges before a full sync
    /// publishes a new snapshot.
    pub fn reset_advertised(&self) {
        self.advertised_keys.reset();
        self.advertised_images.reset();
        self.advertised_image_tags.reset();
        self.advertised_image_digests.reset();
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        TextEncoder::new().encode_to_string(&self.registry.gather()).unwrap_or_default()
    }
}
