// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `host_tab` operations.

use std::time::Duration;
use std::time::Instant;

use anyhow::Context;

use super::{Shard, Store};
use crate::model::{epoch_ms, HostRow};

/// A host whose last keep-alive is older than this is considered dead.
pub const DEAD_TIMEOUT: Duration = Duration::from_secs(11 * 60);

impl Store {
    /// Upsert `(group, host_addr)` with `last_seen = now`.
    pub async fn refresh_host(&self, group: &str, host_addr: &str) -> anyhow::Result<()> {
        let shard = self.write_shard(group)?;
        let now = epoch_ms();
        let start = Instant::now();

        let updated = sqlx::query(
            "UPDATE host_tab SET last_seen = ?, updated_at = ? WHERE host_addr = ? AND `group` = ?",
        )
        .bind(now)
        .bind(now)
        .bind(host_addr)
        .bind(group)
        .execute(&shard.pool)
        .await
        .context("refresh host")?
        .rows_affected();

        if updated == 0 {
            let inserted = sqlx::query(&format!(
                "{} host_tab (host_addr, `group`, last_seen, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?)",
                shard.kind.insert_ignore()
            ))
            .bind(host_addr)
            .bind(group)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&shard.pool)
            .await
            .context("insert host")?
            .rows_affected();

            // Lost the insert race: another keep-alive created the row
            // between our update and insert, refresh it instead.
            if inserted == 0 {
                sqlx::query(
                    "UPDATE host_tab SET last_seen = ?, updated_at = ? \
                     WHERE host_addr = ? AND `group` = ?",
                )
                .bind(now)
                .bind(now)
                .bind(host_addr)
                .bind(group)
                .execute(&shard.pool)
                .await
                .context("refresh host after insert race")?;
            }
        }
        self.observe("host_tab", "refresh_host_addr", start);
        Ok(())
    }

    /// Hosts on the given master whose `last_seen` is older than
    /// `DEAD_TIMEOUT`, across every group.
    pub async fn find_dead_hosts_on(&self, shard: &Shard) -> anyhow::Result<Vec<HostRow>> {
        let threshold = epoch_ms() - DEAD_TIMEOUT.as_millis() as i64;
        let start = Instant::now();
        let rows: Vec<HostRow> = sqlx::query_as(
            "SELECT id, host_addr, `group`, last_seen, created_at, updated_at \
             FROM host_tab WHERE last_seen < ?",
        )
        .bind(threshold)
        .fetch_all(&shard.pool)
        .await
        .context("find dead hosts")?;
        self.observe("host_tab", "find_dead_hosts", start);
        Ok(rows)
    }

    /// Delete a host row on the given master.
    pub async fn delete_host_on(
        &self,
        shard: &Shard,
        group: &str,
        host_addr: &str,
    ) -> anyhow::Result<()> {
        let start = Instant::now();
        sqlx::query("DELETE FROM host_tab WHERE host_addr = ? AND `group` = ?")
            .bind(host_addr)
            .bind(group)
            .execute(&shard.pool)
            .await
            .with_context(|| format!("delete host {host_addr} (group={group})"))?;
        self.observe("host_tab", "delete_host", start);
        Ok(())
    }
}
