// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;

/// The main server startup function, orchestrating setup and the serve loop.
pub async fn run(config: Config) -> Result<()> {
    // 1. Open the storage engine, worker pool, and replication manager; bind.
    let server_context = initialization::setup(config).await?;

    // 2. Serve until shutdown, then drain the worker pool.
    connection_loop::run(server_context).await
}
