// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `distribution_tab` operations.

use std::time::Instant;

use anyhow::Context;

use super::{Shard, Store, FIND_KEY_MAX_RESULTS, MAX_BATCH};
use crate::model::epoch_ms;

impl Store {
    /// Insert `(group, key, holder)` tuples, skipping ones that already
    /// exist. The UNIQUE index on `(group, key, holder)` makes re-advertising
    /// a no-op.
    pub async fn create_distributions(
        &self,
        group: &str,
        holder: &str,
        keys: &[String],
    ) -> anyhow::Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let shard = self.write_shard(group)?;
        let now = epoch_ms();

        let start = Instant::now();
        for chunk in keys.chunks(MAX_BATCH) {
            let mut sql = format!(
                "{} distribution_tab (`key`, holder, `group`, created_at, updated_at) VALUES ",
                shard.kind.insert_ignore()
            );
            sql.push_str(&vec!["(?, ?, ?, ?, ?)"; chunk.len()].join(", "));

            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = query.bind(key).bind(holder).bind(group).bind(now).bind(now);
            }
            query.execute(&shard.pool).await.context("insert distributions")?;
        }
        self.observe("distribution_tab", "insert", start);
        Ok(())
    }

    /// Holders of `(group, key)`, capped at `FIND_KEY_MAX_RESULTS`.
    pub async fn holders_by_key(&self, group: &str, key: &str) -> anyhow::Result<Vec<String>> {
        let shard = self.read_shard(group)?;
        let start = Instant::now();
        let holders: Vec<String> = sqlx::query_scalar(
            "SELECT holder FROM distribution_tab WHERE `group` = ? AND `key` = ? LIMIT ?",
        )
        .bind(group)
        .bind(key)
        .bind(FIND_KEY_MAX_RESULTS as i64)
        .fetch_all(&shard.pool)
        .await
        .with_context(|| format!("get holders for key {key}"))?;
        self.observe("distribution_tab", "get_holder_by_key", start);
        Ok(holders)
    }

    /// Every key the holder currently advertises in `group`. Reads the
    /// group master so a sync sees its own prior writes.
    pub async fn keys_by_holder(&self, group: &str, holder: &str) -> anyhow::Result<Vec<String>> {
        let shard = self.write_shard(group)?;
        let start = Instant::now();
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT `key` FROM distribution_tab WHERE holder = ? AND `group` = ?",
        )
        .bind(holder)
        .bind(group)
        .fetch_all(&shard.pool)
        .await
        .context("get keys by holder")?;
        self.observe("distribution_tab", "get_keys_by_holder", start);
        Ok(keys)
    }

    /// Delete specific keys for a holder in `group`.
    pub async fn delete_keys_by_holder(
        &self,
        group: &str,
        holder: &str,
        keys: &[String],
    ) -> anyhow::Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let shard = self.write_shard(group)?;
        let start = Instant::now();
        for chunk in keys.chunks(MAX_BATCH) {
            let mut sql = String::from(
                "DELETE FROM distribution_tab WHERE `group` = ? AND holder = ? AND `key` IN (",
            );
            sql.push_str(&vec!["?"; chunk.len()].join(", "));
            sql.push(')');

            let mut query = sqlx::query(&sql).bind(group).bind(holder);
            for key in chunk {
                query = query.bind(key);
            }
            query.execute(&shard.pool).await.context("delete keys by holder")?;
        }
        self.observe("distribution_tab", "delete_by_keys", start);
        Ok(())
    }

    /// Delete every distribution a holder advertised in `group`, on the
    /// given master. Used by the evictor, paired with `delete_host`.
    pub async fn delete_by_holder_on(
        &self,
        shard: &Shard,
        group: &str,
        holder: &str,
    ) -> anyhow::Result<()> {
        let start = Instant::now();
        sqlx::query("DELETE FROM distribution_tab WHERE holder = ? AND `group` = ?")
            .bind(holder)
            .bind(group)
            .execute(&shard.pool)
            .await
            .with_context(|| format!("delete distributions for holder {holder} (group={group})"))?;
        self.observe("distribution_tab", "delete_by_holder", start);
        Ok(())
    }
}
