// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background eviction of dead hosts and their distributions.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::AppState;

/// How often the evictor sweeps for dead hosts.
pub const EVICTOR_CHECK: Duration = Duration::from_secs(10 * 60);

/// Spawn the evictor loop. The first sweep runs after a uniform random
/// delay in `[0, EVICTOR_CHECK)` so that replicas of the directory do not
/// sweep in lockstep.
pub fn spawn_evictor(state: Arc<AppState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let initial = rand::thread_rng().gen_range(Duration::ZERO..EVICTOR_CHECK);
        tracing::info!(delay_secs = initial.as_secs(), "evictor first sweep delayed");

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(initial) => {}
        }

        let mut timer = tokio::time::interval(EVICTOR_CHECK);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            if let Err(e) = sweep(&state).await {
                tracing::error!(err = %e, "evictor sweep failed");
            }
        }
    });
}

/// One sweep: on every physical master, find hosts whose last keep-alive is
/// past the dead timeout and delete their distributions, then their host
/// row. The order matters: a host row removed first would leak its
/// distributions if the second delete fails.
pub async fn sweep(state: &AppState) -> anyhow::Result<()> {
    state.metrics.evictor_total.inc();
    let timer = state.metrics.evictor_duration.start_timer();

    for master in state.store.masters() {
        let dead = state.store.find_dead_hosts_on(master).await?;
        for host in dead {
            tracing::info!(host_addr = %host.host_addr, group = %host.group, last_seen = host.last_seen, "evicting dead host");
            if let Err(e) =
                state.store.delete_by_holder_on(master, &host.group, &host.host_addr).await
            {
                tracing::error!(host_addr = %host.host_addr, err = %e, "failed to delete distributions for dead host");
                continue;
            }
            if let Err(e) =
                state.store.delete_host_on(master, &host.group, &host.host_addr).await
            {
                tracing::error!(host_addr = %host.host_addr, err = %e, "failed to delete dead host row");
            }
        }
    }

    timer.observe_duration();
    Ok(())
}
