//! tabserve CLI - batch prediction server
//!
//! # Commands
//!
//! - `serve` - Start the prediction server
//! - `loadgen` - Send synthetic traffic to a server
//! - `info` - Show version info

use clap::Parser;
use tabserve::cli::{entrypoint, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Err(e) = entrypoint(cli).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
