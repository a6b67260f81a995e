//! tether - run remote actions over SSH when watched files change

#![cfg_attr(test, allow(clippy::expect_used))]

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tether_cli::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = cli.run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
