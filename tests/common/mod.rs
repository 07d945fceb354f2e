// tests/common/mod.rs

//! Shared harness for spinning up one or more in-process nodes on ephemeral
//! loopback ports.

use kvstore_node::config::ReplicationConfig;
use kvstore_node::proto::key_value_store_server::KeyValueStoreServer;
use kvstore_node::replication::ReplicationManager;
use kvstore_node::rpc::Servicer;
use kvstore_node::worker::WorkerPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

pub struct TestNode {
    pub addr: SocketAddr,
}

/// Starts one in-process node per entry in `peer_counts_per_node`... actually
/// simpler: starts `node_count` nodes, fully meshed (every node replicates
/// to every other node), each with its own temp storage path.
pub async fn spawn_mesh(dir: &std::path::Path, node_count: usize) -> Vec<TestNode> {
    let mut listeners = Vec::with_capacity(node_count);
    let mut addrs = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        addrs.push(addr);
        listeners.push(listener);
    }

    for (i, listener) in listeners.into_iter().enumerate() {
        let own_addr = addrs[i];
        let peers: Vec<String> = addrs
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, a)| a.to_string())
            .collect();

        let storage_path = dir.join(format!("node-{i}.redb"));
        let backup_path = dir.join(format!("node-{i}-backup.redb"));
        let workers = Arc::new(WorkerPool::spawn(storage_path, 0, 2).unwrap());
        let mut replication_config = ReplicationConfig::default();
        replication_config.initial_backoff_ms = 10;
        replication_config.max_backoff_ms = 20;
        replication_config.attempt_timeout_ms = 200;
        replication_config.max_retries = 2;
        let replication = Arc::new(ReplicationManager::new(peers, replication_config));
        let servicer = Servicer::new(workers, replication, backup_path);

        tokio::spawn(async move {
            let _ = Server::builder()
                .add_service(KeyValueStoreServer::new(servicer))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await;
        });
        let _ = own_addr;
    }

    // Let each server start accepting before callers connect.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    addrs.into_iter().map(|addr| TestNode { addr }).collect()
}

pub async fn spawn_single(dir: &std::path::Path) -> TestNode {
    spawn_mesh(dir, 1).await.into_iter().next().unwrap()
}

pub fn client_addr(node: &TestNode) -> String {
    format!("http://{}", node.addr)
}
