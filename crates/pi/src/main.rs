// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use pi::config::AgentConfig;

#[derive(Parser)]
#[command(
    name = "pi",
    version,
    about = "Per-node agent serving locally cached images to its peers."
)]
struct Cli {
    #[command(flatten)]
    config: AgentConfig,

    /// Minimum log level to output (DEBUG, INFO, WARN, or ERROR).
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,
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

    if let Err(e) = pi::run(cli.config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
