//! vs-server: HTTP job API and the long-running engine process.
//!
//! This crate ties the vs-* crates together into a running server:
//!
//! - Axum-based JSON API to submit, query and cancel jobs
//! - SSE push of job events
//! - The scheduler's dispatch loop
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use vs_core::config::Config;

pub use crate::context::AppContext;

/// Start the vidshift server.
///
/// Builds the engine, re-enqueues work left by a previous run, then serves
/// the API until a shutdown signal is received.
pub async fn start(config: Config) -> vs_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| vs_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let ctx = AppContext::build(config)?;
    let recovered = ctx.scheduler.recover()?;
    if recovered > 0 {
        tracing::info!("Recovered {recovered} queued jobs");
    }

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| vs_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Starting server on {addr}");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    serve(ctx, listener, cancel).await
}

/// Run the dispatch loop and serve the API on `listener` until `cancel`
/// fires.
pub async fn serve(ctx: AppContext, listener: TcpListener, cancel: CancellationToken) -> vs_core::Result<()> {
    let scheduler_handle = ctx.scheduler.start(cancel.clone());

    let app = router::build_router(ctx);
    let shutdown = cancel.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    cancel.cancel();
    let _ = scheduler_handle.await;
    tracing::info!("Server shutdown complete");

    result.map_err(|e| vs_core::Error::Io { source: e })
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
