// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Group-sharded SQL storage for the directory.
//!
//! The store is configured from a DSN list of the form `group:role:dsn`.
//! Each group routes writes to its master and reads to a random replica;
//! groups without their own pools fall back to the `default` group. MySQL
//! and SQLite URLs are supported (SQLite is what the tests run on).

mod distribution;
mod host;
mod migrate;

pub use migrate::create_tables;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use rand::Rng;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::metrics::Metrics;

pub const MAX_BATCH: usize = 100;
pub const FIND_KEY_MAX_RESULTS: usize = 2000;

pub const DEFAULT_GROUP: &str = "default";

/// SQL dialect of a shard, derived from its DSN scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    MySql,
    Sqlite,
}

impl SqlKind {
    pub fn from_url(url: &str) -> anyhow::Result<Self> {
        if url.starts_with("mysql:") {
            Ok(Self::MySql)
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            bail!("unsupported database scheme in DSN {url:?} (expected mysql: or sqlite:)")
        }
    }

    /// Dialect-specific `INSERT`-and-skip-duplicates statement prefix.
    pub fn insert_ignore(&self) -> &'static str {
        match self {
            Self::MySql => "INSERT IGNORE INTO",
            Self::Sqlite => "INSERT OR IGNORE INTO",
        }
    }
}

/// One physical database connection pool.
#[derive(Clone)]
pub struct Shard {
    pub url: String,
    pub kind: SqlKind,
    pub pool: AnyPool,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard").field("url", &redact_dsn(&self.url)).finish()
    }
}

struct GroupPools {
    master: Shard,
    replicas: Vec<Shard>,
}

/// Group-sharded store routing reads and writes per the DSN list.
pub struct Store {
    groups: HashMap<String, GroupPools>,
    masters: Vec<Shard>,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Master,
    Slave,
}

/// A parsed `group:role:dsn` entry.
#[derive(Debug, Clone)]
struct DsnEntry {
    group: String,
    role: Role,
    dsn: String,
}

fn parse_dsn_entry(raw: &str) -> anyhow::Result<DsnEntry> {
    let mut parts = raw.splitn(3, ':');
    let group = parts.next().unwrap_or_default();
    let role = parts.next().unwrap_or_default();
    let dsn = parts.next().unwrap_or_default();
    if group.is_empty() || role.is_empty() || dsn.is_empty() {
        bail!("invalid DSN entry {raw:?}, expected \"group:role:dsn\"");
    }
    let role = match role {
        "master" => Role::Master,
        "slave" => Role::Slave,
        other => bail!("invalid role {other:?} in DSN entry {raw:?}, expected master or slave"),
    };
    Ok(DsnEntry { group: group.to_owned(), role, dsn: dsn.to_owned() })
}

/// Strip credentials from a DSN for logging.
fn redact_dsn(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(s), Some(a)) if a > s + 3 => format!("{}://…@{}", &url[..s], &url[a + 1..]),
        _ => url.to_owned(),
    }
}

impl Store {
    /// Connect every pool named in the DSN list and verify the topology.
    pub async fn connect(dsn_list: &[String], metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();

        if dsn_list.is_empty() {
            bail!("no database DSNs configured, pass --db-dsn-list");
        }

        let entries =
            dsn_list.iter().map(|raw| parse_dsn_entry(raw)).collect::<anyhow::Result<Vec<_>>>()?;

        // Identical DSNs share one physical pool, so a group pinning the
        // default master does not open a second connection set.
        let mut shards: HashMap<String, Shard> = HashMap::new();
        for entry in &entries {
            if shards.contains_key(&entry.dsn) {
                continue;
            }
            let kind = SqlKind::from_url(&entry.dsn)?;
            // Every connection to an in-memory sqlite URL opens its own
            // database, so those pools are capped at one connection.
            let max_connections = match kind {
                SqlKind::MySql => 20,
                SqlKind::Sqlite => 1,
            };
            let pool = AnyPoolOptions::new()
                .max_connections(max_connections)
                .connect(&entry.dsn)
                .await
                .with_context(|| format!("connect to {}", redact_dsn(&entry.dsn)))?;
            tracing::info!(dsn = %redact_dsn(&entry.dsn), "database connected");
            shards.insert(entry.dsn.clone(), Shard { url: entry.dsn.clone(), kind, pool });
        }

        let mut groups: HashMap<String, GroupPools> = HashMap::new();
        for entry in entries.iter().filter(|e| e.role == Role::Master) {
            let shard = shards[&entry.dsn].clone();
            match groups.get(&entry.group) {
                Some(g) if g.master.url != entry.dsn => {
                    bail!("group {:?} has more than one master DSN", entry.group)
                }
                Some(_) => {}
                None => {
                    groups.insert(
                        entry.group.clone(),
                        GroupPools { master: shard, replicas: Vec::new() },
                    );
                }
            }
        }

        let default_master = groups
            .get(DEFAULT_GROUP)
            .map(|g| g.master.clone())
            .ok_or_else(|| anyhow!("the {DEFAULT_GROUP:?} group must have a master DSN"))?;

        // A group may list only replicas; its writes fall back to the
        // default master.
        for entry in entries.iter().filter(|e| e.role == Role::Slave) {
            let shard = shards[&entry.dsn].clone();
            groups
                .entry(entry.group.clone())
                .or_insert_with(|| GroupPools {
                    master: default_master.clone(),
                    replicas: Vec::new(),
                })
                .replicas
                .push(shard);
        }

        let mut masters: Vec<Shard> = Vec::new();
        for g in groups.values() {
            if !masters.iter().any(|m| m.url == g.master.url) {
                masters.push(g.master.clone());
            }
        }

        Ok(Self { groups, masters, metrics })
    }

    fn group_pools(&self, group: &str) -> anyhow::Result<&GroupPools> {
        self.groups
            .get(group)
            .or_else(|| self.groups.get(DEFAULT_GROUP))
            .ok_or_else(|| anyhow!("no pools for group {group:?} and no default group"))
    }

    /// Shard for writes in `group`: always the group master.
    pub fn write_shard(&self, group: &str) -> anyhow::Result<&Shard> {
        Ok(&self.group_pools(group)?.master)
    }

    /// Shard for reads in `group`: a random replica, or the master when the
    /// group has none.
    pub fn read_shard(&self, group: &str) -> anyhow::Result<&Shard> {
        let pools = self.group_pools(group)?;
        if pools.replicas.is_empty() {
            return Ok(&pools.master);
        }
        let i = rand::thread_rng().gen_range(0..pools.replicas.len());
        Ok(&pools.replicas[i])
    }

    /// Every distinct physical master. The evictor sweeps these, because
    /// `group` is a row attribute and dead hosts must be found regardless of
    /// which group wrote them.
    pub fn masters(&self) -> &[Shard] {
        &self.masters
    }

    pub(crate) fn observe(&self, table: &str, op: &str, start: Instant) {
        self.metrics.db_query_total.with_label_values(&[table, op]).inc();
        self.metrics
            .db_query_duration
            .with_label_values(&[table, op])
            .observe(start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
