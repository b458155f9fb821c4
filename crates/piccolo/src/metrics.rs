// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus metrics for the directory service.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// All directory metrics plus the registry they are registered on.
///
/// Constructed once at startup and passed around as a handle.
pub struct Metrics {
    pub registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
    pub db_query_total: IntCounterVec,
    pub db_query_duration: HistogramVec,
    pub findkey_holder_count: Histogram,
    pub evictor_total: IntCounter,
    pub evictor_duration: Histogram,
    pub evictor_enabled: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("piccolo_http_requests_total", "Total number of HTTP requests."),
            &["route", "method", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "piccolo_http_request_duration_seconds",
                "HTTP request duration in seconds.",
            ),
            &["route", "method"],
        )?;
        let db_query_total = IntCounterVec::new(
            Opts::new("piccolo_db_query_total", "Total number of database queries."),
            &["table", "op"],
        )?;
        let db_query_duration = HistogramVec::new(
            HistogramOpts::new(
                "piccolo_db_query_duration_seconds",
                "Database query duration in seconds.",
            ),
            &["table", "op"],
        )?;
        let findkey_holder_count = Histogram::with_opts(
            HistogramOpts::new(
                "piccolo_findkey_holder_count",
                "Number of holders returned from the database per findkey.",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 2000.0]),
        )?;
        let evictor_total =
            IntCounter::new("piccolo_evictor_total", "Total number of evictor sweeps.")?;
        let evictor_duration = Histogram::with_opts(HistogramOpts::new(
            "piccolo_evictor_duration_seconds",
            "Evictor sweep duration in seconds.",
        ))?;
        let evictor_enabled =
            IntGauge::new("piccolo_evictor_enabled", "Whether the evictor is enabled.")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(db_query_total.clone()))?;
        registry.register(Box::new(db_query_duration.clone()))?;
        registry.register(Box::new(findkey_holder_count.clone()))?;
        registry.register(Box::new(evictor_total.clone()))?;
        registry.register(Box::new(evictor_duration.clone()))?;
        registry.register(Box::new(evictor_enabled.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            db_query_total,
            db_query_duration,
            findkey_holder_count,
            evictor_total,
            evictor_duration,
            evictor_enabled,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        TextEncoder::new().encode_to_string(&self.registry.gather()).unwrap_or_default()
    }
}
