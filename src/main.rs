//! causelog CLI entry point
//!
//! Installs logging (stderr, `RUST_LOG`, default `info`), then hands off
//! to the CLI module. Exits non-zero on failure.

use causelog::cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
