use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

mod analysis;
mod cli;
mod config;
mod data_handling;
mod errors;
mod helper_functions;
mod metrics;
mod models;
mod progression;
mod resolver;
mod table;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise -vv turns on debug output
    let default_level = if cli.verbose > 1 { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting the 2HG report pipeline");
    cli::run(cli)
}
