// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schema creation for `distribution_tab` and `host_tab`.

use anyhow::Context;

use super::{Shard, SqlKind};

const MYSQL_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS distribution_tab (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `key` VARCHAR(255) NOT NULL,
        holder VARCHAR(64) NOT NULL,
        `group` VARCHAR(64) NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        UNIQUE KEY idx_group_key_holder_uniq (`group`, `key`, holder),
        KEY idx_holder (holder)
    )",
    "CREATE TABLE IF NOT EXISTS host_tab (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        host_addr VARCHAR(64) NOT NULL,
        `group` VARCHAR(64) NOT NULL,
        last_seen BIGINT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        UNIQUE KEY idx_group_host (`group`, host_addr)
    )",
];

const SQLITE_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS distribution_tab (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        `key` TEXT NOT NULL,
        holder TEXT NOT NULL,
        `group` TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (`group`, `key`, holder)
    )",
    "CREATE INDEX IF NOT EXISTS idx_holder ON distribution_tab (holder)",
    "CREATE TABLE IF NOT EXISTS host_tab (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        host_addr TEXT NOT NULL,
        `group` TEXT NOT NULL,
        last_seen INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (`group`, host_addr)
    )",
];

/// Create both tables on the shard if they do not exist.
pub async fn create_tables(shard: &Shard) -> anyhow::Result<()> {
    let statements = match shard.kind {
        SqlKind::MySql => MYSQL_DDL,
        SqlKind::Sqlite => SQLITE_DDL,
    };
    for ddl in statements {
        sqlx::query(ddl).execute(&shard.pool).await.context("create table")?;
    }
    Ok(())
}
