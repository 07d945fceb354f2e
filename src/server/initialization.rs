// src/server/initialization.rs

//! Handles the complete server initialization process: opening the storage
//! engine, spawning the worker pool, building the replication manager, and
//! binding the listen address.

use super::context::ServerContext;
use crate::config::Config;
use crate::replication::ReplicationManager;
use crate::rpc::Servicer;
use crate::worker::WorkerPool;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);

    let (shutdown_tx, _) = broadcast::channel(1);

    let workers = Arc::new(
        WorkerPool::spawn(
            &config.storage.path,
            config.storage.max_size_bytes,
            config.workers,
        )
        .with_context(|| format!("failed to open storage engine at {}", config.storage.path))?,
    );
    info!(
        "storage engine open at {} with {} workers",
        config.storage.path, config.workers
    );

    let peers = config.effective_peers();
    info!("replicating to {} peer(s): {:?}", peers.len(), peers);
    let replication = Arc::new(ReplicationManager::new(peers, config.replication.clone()));

    let servicer = Servicer::new(workers.clone(), replication, config.backup.path.clone());

    let addr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address '{}:{}'", config.host, config.port))?;

    Ok(ServerContext {
        addr,
        servicer,
        workers,
        shutdown_tx,
    })
}

fn log_startup_info(config: &Config) {
    info!(
        "starting kvstore-node on {}:{} (log_level={})",
        config.host, config.port, config.log_level
    );
}
