//! Auris CLI
//!
//! Offline rendering and calibration inspection for the Auris pipeline.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use auris::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Auris v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Render(args)) => {
            commands::render(&args)
                .await
                .with_context(|| format!("failed to render {}", args.input.display()))?;
        }
        Some(Commands::Staging { volume, bass }) => {
            commands::staging(volume, bass).context("failed to compute staging")?;
        }
        None => {
            println!("Auris v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
        }
    }
    Ok(())
}
