// src/server/connection_loop.rs

//! Binds the gRPC service and drives it to completion, handling graceful
//! shutdown and the final worker pool drain.

use super::context::ServerContext;
use crate::proto::key_value_store_server::KeyValueStoreServer;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

// Platform-specific signal handling imports
#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("failed to install Ctrl+C handler");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// Serves the `KeyValueStore` RPC until a shutdown signal arrives, then
/// drains the worker pool before returning. Realizes the
/// `INIT -> LISTENING -> DRAINING -> STOPPED` lifecycle.
pub async fn run(ctx: ServerContext) -> Result<()> {
    let ServerContext {
        addr,
        servicer,
        workers,
        shutdown_tx,
    } = ctx;

    info!("kvstore-node listening on {addr}");

    let mut shutdown_rx = shutdown_tx.subscribe();
    let serve = tonic::transport::Server::builder()
        .add_service(KeyValueStoreServer::new(servicer))
        .serve_with_shutdown(addr, async move {
            tokio::select! {
                _ = await_shutdown_signal() => {},
                _ = shutdown_rx.recv() => {},
            }
        });

    serve.await?;
    info!("RPC surface stopped accepting new work; draining worker pool.");

    match Arc::try_unwrap(workers) {
        Ok(workers) => workers.shutdown().await,
        Err(_) => {
            // A clone of the pool handle is still held elsewhere (e.g. an
            // in-flight replication task); the pool drains on its own once
            // that last handle drops.
            info!("worker pool has outstanding handles; draining in the background.");
        }
    }

    info!("server shutdown complete.");
    Ok(())
}
