// src/server/context.rs

use crate::rpc::Servicer;
use crate::worker::WorkerPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub addr: SocketAddr,
    pub servicer: Servicer,
    pub workers: Arc<WorkerPool>,
    pub shutdown_tx: broadcast::Sender<()>,
}
