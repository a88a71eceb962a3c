#![warn(missing_docs)]

//! `doclocale` binary.

use anyhow::Result;
use clap::Parser;
use doclocale_core::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if cli.uses_defaults() {
        tracing::warn!("Config file not found, using defaults: {}", cli.config.display());
    }
    tracing::info!("doclocale starting...");
    cli.run(config).await
}
