// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pi: per-node agent exposing locally cached OCI content as a
//! peer-to-peer pull-through mirror.

pub mod config;
pub mod httpclient;
pub mod metrics;
pub mod oci;
pub mod ratelimit;
pub mod registry;
pub mod sd;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::metrics::Metrics;
use crate::oci::containerd::Containerd;
use crate::oci::OciClient;
use crate::ratelimit::new_blob_limiter;
use crate::sd::{PiccoloClient, ServiceDiscover};
use crate::tracker::Tracker;

/// Every activity must return within this long of shutdown starting.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Run the agent: mirror server, peer server, metrics server, and state
/// tracker under one cancellation scope. The first activity to fail (or an
/// interrupt) shuts the rest down.
pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    anyhow::ensure!(config.full_refresh_minutes > 0, "--full-refresh-minutes must be positive");

    let shutdown = CancellationToken::new();
    let metrics = Arc::new(Metrics::new()?);

    let oci: Arc<dyn OciClient> = Arc::new(
        Containerd::connect(
            &config.containerd_sock,
            &config.containerd_namespace,
            &config.containerd_content_path,
            &config.registry_hosts(),
        )
        .await?,
    );

    let sd: Arc<dyn ServiceDiscover> = Arc::new(PiccoloClient::new(
        &config.piccolo_api,
        &config.pi_listen_addr,
        &config.group,
        shutdown.clone(),
        Arc::clone(&metrics),
    )?);

    let mut activities: JoinSet<anyhow::Result<()>> = JoinSet::new();

    // Peer server.
    {
        let limiter = new_blob_limiter(config.max_upload_blob_bytes_per_second)?;
        let state = Arc::new(registry::peer::PeerServer::new(
            Arc::clone(&oci),
            limiter,
            Arc::clone(&metrics),
            config.max_upload_connections,
        ));
        let router = registry::peer::build_router(state);
        let listener = TcpListener::bind(&config.pi_listen_addr).await?;
        tracing::info!(addr = %config.pi_listen_addr, "pi server listening");
        let token = shutdown.clone();
        activities.spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await?;
            Ok(())
        });
    }

    // Mirror server.
    {
        let state = Arc::new(registry::mirror::MirrorServer::new(
            Arc::clone(&sd),
            Arc::clone(&metrics),
            config.mirror_resolve_retries,
            config.mirror_resolve_timeout(),
            config.resolve_latest_tag,
        )?);
        let router = registry::mirror::build_router(state);
        let listener = TcpListener::bind(&config.registry_listen_addr).await?;
        tracing::info!(addr = %config.registry_listen_addr, "registry server listening");
        let token = shutdown.clone();
        activities.spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await?;
            Ok(())
        });
    }

    // Metrics server.
    {
        let router = metrics_router(Arc::clone(&metrics));
        let listener = TcpListener::bind(&config.metrics_listen_addr).await?;
        tracing::info!(addr = %config.metrics_listen_addr, "metrics server listening");
        let token = shutdown.clone();
        activities.spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await?;
            Ok(())
        });
    }

    // State tracker.
    {
        let tracker = Arc::new(Tracker::new(
            Arc::clone(&oci),
            Arc::clone(&sd),
            Arc::clone(&metrics),
            config.resolve_latest_tag,
            config.full_refresh_interval(),
        ));
        let token = shutdown.clone();
        activities.spawn(async move { tracker.run(token).await });
    }

    // Interrupt handling.
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if wait_for_signal().await.is_ok() {
                tracing::info!("signal received, shutting down");
                token.cancel();
            }
        });
    }

    // First activity to finish (cleanly or not) takes the rest down.
    let first = activities.join_next().await;
    shutdown.cancel();
    let result = match first {
        Some(Ok(result)) => result,
        Some(Err(join_error)) => Err(anyhow::anyhow!("activity panicked: {join_error}")),
        None => Ok(()),
    };

    if tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        while activities.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        tracing::warn!("shutdown deadline exceeded, aborting remaining activities");
        activities.abort_all();
    }

    result
}

fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(|State(m): State<Arc<Metrics>>| async move {
                ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], m.render()).into_response()
            }),
        )
        .route("/healthz", get(|| async { "ok" }))
        .with_state(metrics)
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
