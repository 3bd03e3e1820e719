//! CLI command implementations
//!
//! This module contains the business logic behind each command, kept out of
//! main.rs for testability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{
    api::{create_router, AppState},
    config::{LoadConfig, ServeConfig},
    error::{Result, ServeError},
    loadgen::{self, WorkerReport},
};

pub mod handlers;
pub use handlers::{Cli, Commands};

/// Main CLI entrypoint - dispatches commands to handlers
pub async fn entrypoint(cli: Cli) -> Result<()> {
    if let Some(config) = cli.command.serve_config() {
        return serve(config).await;
    }
    if let Some(config) = cli.command.load_config() {
        return run_loadgen(config).await;
    }
    print_info();
    Ok(())
}

/// Load the model and serve until Ctrl-C
///
/// # Errors
///
/// Returns an error for an unparsable address, a port that cannot be bound
/// a metric registry failure or a server failure. A missing or broken model
/// is not an error here.
pub async fn serve(config: ServeConfig) -> Result<()> {
    let addr = config.socket_addr()?;

    println!("Loading model from: {}", config.model_dir.display());
    let state = AppState::load(&config)?;
    let app = create_router(state);

    println!("Server listening on http://{addr}");
    println!();
    println!("Endpoints:");
    println!("  GET  /               - Health check");
    println!("  POST /predict        - Batch prediction");
    println!("  GET  /metrics        - Prometheus metrics");
    println!("  GET  /make_test_load - Start background load");
    println!();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServeError::Server(format!("Failed to bind {addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServeError::Server(format!("Server error: {e}")))?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Run the load generator in the foreground, stopping early on Ctrl-C
///
/// # Errors
///
/// Propagates [`loadgen::run_load`] failures.
pub async fn run_loadgen(config: LoadConfig) -> Result<()> {
    config.validate()?;
    println!(
        "Sending load to {} with {} users for {}s",
        config.api_url, config.users, config.duration
    );

    let stop = Arc::new(AtomicBool::new(false));
    let interrupt = {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::Relaxed);
            }
        })
    };

    let reports = tokio::task::spawn_blocking(move || loadgen::run_load(&config, stop))
        .await
        .map_err(|e| ServeError::Worker(format!("load generator task failed: {e}")))?;
    interrupt.abort();

    print_reports(&reports?);
    Ok(())
}

fn print_reports(reports: &[WorkerReport]) {
    for r in reports {
        println!("[{}] sent={}, ok={}", r.worker, r.sent, r.ok);
    }
    let sent: u64 = reports.iter().map(|r| r.sent).sum();
    let ok: u64 = reports.iter().map(|r| r.ok).sum();
    println!("Total: sent={sent}, ok={ok}");
}

fn print_info() {
    println!("tabserve {}", crate::VERSION);
    println!("Batch prediction server for tabular regression models");
}
