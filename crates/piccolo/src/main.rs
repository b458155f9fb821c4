// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::{Parser, Subcommand};
use tracing::error;

use piccolo::config::ServerConfig;
use piccolo::storage::{create_tables, Store};

#[derive(Parser)]
#[command(name = "piccolo", version, about = "Central directory for peer-to-peer image distribution.")]
struct Cli {
    /// Minimum log level to output (DEBUG, INFO, WARN, or ERROR).
    #[arg(long, global = true, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the directory server.
    Server(ServerConfig),
    /// Create the schema on one or more databases.
    MigrateDb(MigrateArgs),
}

#[derive(clap::Args)]
struct MigrateArgs {
    /// Database DSN(s) to migrate.
    #[arg(required = true)]
    databases: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.to_lowercase())),
        )
        .init();

    let result = match cli.command {
        Commands::Server(config) => piccolo::run(config).await,
        Commands::MigrateDb(args) => migrate(&args.databases).await,
    };

    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn migrate(databases: &[String]) -> anyhow::Result<()> {
    use std::sync::Arc;

    let metrics = Arc::new(piccolo::metrics::Metrics::new()?);
    for (i, dsn) in databases.iter().enumerate() {
        tracing::info!(index = i + 1, total = databases.len(), "migrating database");
        let store =
            Store::connect(&[format!("default:master:{dsn}")], Arc::clone(&metrics)).await?;
        for master in store.masters() {
            create_tables(master).await?;
        }
        tracing::info!(index = i + 1, "database schema migrated");
    }
    tracing::info!("all database migrations completed");
    Ok(())
}
