// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Piccolo: directory service mapping content keys to the nodes holding them.

pub mod config;
pub mod error;
pub mod evictor;
pub mod handlers;
pub mod locality;
pub mod metrics;
pub mod model;
pub mod storage;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::storage::Store;

/// Shared state for the directory handlers.
pub struct AppState {
    pub store: Store,
    pub metrics: Arc<Metrics>,
}

/// Run the directory server until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let metrics = Arc::new(Metrics::new()?);
    let store = Store::connect(&config.db_dsn_list, Arc::clone(&metrics)).await?;
    let state = Arc::new(AppState { store, metrics: Arc::clone(&metrics) });

    if config.enable_evictor {
        metrics.evictor_enabled.set(1);
        evictor::spawn_evictor(Arc::clone(&state), shutdown.clone());
    } else {
        metrics.evictor_enabled.set(0);
        tracing::info!("evictor disabled, dead hosts will not be cleaned up automatically");
    }

    let router = handlers::build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&config.piccolo_address).await?;
    tracing::info!(addr = %config.piccolo_address, evictor = config.enable_evictor, "piccolo listening");

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                shutdown.cancel();
            }
        });
    }

    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
