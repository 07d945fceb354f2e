// src/replication/mod.rs

//! Asynchronous, per-peer replication of mutations with cached connections
//! and bounded retry/backoff. Fan-out is detached from the RPC handler that
//! triggered it (I4): a client's reply never waits on this module.

use crate::config::ReplicationConfig;
use crate::proto::key_value_store_client::KeyValueStoreClient;
use crate::proto::{Key, KeyValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::{debug, error, warn};

/// A peer's connection state, per the re-architecture guidance in the
/// source design: treat each peer stub as a small state machine rather
/// than inspecting transport-internal channel state directly (`tonic`'s
/// `Channel` exposes no synchronous READY probe the way a grpc.aio channel
/// does).
#[derive(Clone)]
enum PeerStub {
    /// No connection attempted yet, or the last one failed and was
    /// discarded.
    Unknown,
    /// A connection that completed at least one successful RPC.
    Ready(KeyValueStoreClient<Channel>),
}

/// Caches one [`PeerStub`] per configured peer and drives the retry/backoff
/// fan-out described in §4.3.
pub struct ReplicationManager {
    peers: Vec<String>,
    config: ReplicationConfig,
    stubs: Arc<Mutex<HashMap<String, PeerStub>>>,
}

impl ReplicationManager {
    /// `peers` must already have this node's own address excluded (I3/I5);
    /// see [`crate::config::Config::effective_peers`].
    pub fn new(peers: Vec<String>, config: ReplicationConfig) -> Self {
        let stubs = peers
            .iter()
            .cloned()
            .map(|p| (p, PeerStub::Unknown))
            .collect();
        Self {
            peers,
            config,
            stubs: Arc::new(Mutex::new(stubs)),
        }
    }

    /// Returns a connected stub for `peer`, rebuilding it if the cached one
    /// is not [`PeerStub::Ready`].
    async fn get_stub(&self, peer: &str) -> Result<KeyValueStoreClient<Channel>, String> {
        {
            let stubs = self.stubs.lock().await;
            if let Some(PeerStub::Ready(client)) = stubs.get(peer) {
                return Ok(client.clone());
            }
        }

        let endpoint = format!("http://{peer}");
        let client = KeyValueStoreClient::connect(endpoint)
            .await
            .map_err(|e| format!("failed to connect to peer {peer}: {e}"))?;

        let mut stubs = self.stubs.lock().await;
        stubs.insert(peer.to_string(), PeerStub::Ready(client.clone()));
        Ok(client)
    }

    /// Marks `peer`'s cached stub as broken so the next use rebuilds it.
    async fn mark_broken(&self, peer: &str) {
        let mut stubs = self.stubs.lock().await;
        stubs.insert(peer.to_string(), PeerStub::Unknown);
    }

    /// Retries `attempt_rpc` against `peer` with exponential backoff,
    /// per §4.3's per-peer procedure. `attempt_rpc` is handed a fresh stub
    /// on every attempt so a broken connection is rebuilt before retrying.
    async fn replicate_with_retry<F, Fut>(&self, peer: &str, attempt_rpc: F)
    where
        F: Fn(KeyValueStoreClient<Channel>) -> Fut,
        Fut: std::future::Future<Output = Result<(), tonic::Status>>,
    {
        let mut delay = Duration::from_millis(self.config.initial_backoff_ms);
        let max_delay = Duration::from_millis(self.config.max_backoff_ms);
        let timeout = Duration::from_millis(self.config.attempt_timeout_ms);

        for attempt in 1..=self.config.max_retries {
            let stub = match self.get_stub(peer).await {
                Ok(stub) => stub,
                Err(e) => {
                    warn!("replication attempt {attempt}/{} to {peer}: {e}", self.config.max_retries);
                    self.mark_broken(peer).await;
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(delay.min(max_delay)).await;
                        delay *= 2;
                        continue;
                    }
                    error!("final failure: could not replicate to {peer}: {e}");
                    return;
                }
            };

            match tokio::time::timeout(timeout, attempt_rpc(stub)).await {
                Ok(Ok(())) => {
                    debug!("replication to {peer} succeeded");
                    return;
                }
                Ok(Err(status)) => {
                    warn!(
                        "replication attempt {attempt}/{} to {peer} failed: {status}",
                        self.config.max_retries
                    );
                    self.mark_broken(peer).await;
                }
                Err(_elapsed) => {
                    warn!(
                        "replication attempt {attempt}/{} to {peer} timed out",
                        self.config.max_retries
                    );
                    self.mark_broken(peer).await;
                }
            }

            if attempt < self.config.max_retries {
                tokio::time::sleep(delay.min(max_delay)).await;
                delay *= 2;
            } else {
                error!("final failure: could not replicate to {peer} after {attempt} attempts");
            }
        }
    }

    /// Fans a `Put` out to every configured peer, concurrently. Each
    /// peer's RPC is marked `no_replicate` so the receiving node applies it
    /// locally without re-triggering its own fan-out (§9's anti-storm fix).
    pub async fn replicate_put(self: &Arc<Self>, key: String, value: String) {
        if self.peers.is_empty() {
            return;
        }
        let tasks = self.peers.clone().into_iter().map(|peer| {
            let this = self.clone();
            let key = key.clone();
            let value = value.clone();
            tokio::spawn(async move {
                this.replicate_with_retry(&peer, |mut stub| {
                    let request = KeyValue {
                        key: key.clone(),
                        value: value.clone(),
                        no_replicate: true,
                    };
                    async move { stub.put(request).await.map(|_| ()) }
                })
                .await;
            })
        });
        futures::future::join_all(tasks).await;
    }

    /// Fans a `Delete` out to every configured peer, concurrently.
    pub async fn replicate_delete(self: &Arc<Self>, key: String) {
        if self.peers.is_empty() {
            return;
        }
        let tasks = self.peers.clone().into_iter().map(|peer| {
            let this = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                this.replicate_with_retry(&peer, |mut stub| {
                    let request = Key {
                        key: key.clone(),
                        no_replicate: true,
                    };
                    async move { stub.delete(request).await.map(|_| ()) }
                })
                .await;
            })
        });
        futures::future::join_all(tasks).await;
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl std::fmt::Debug for ReplicationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationManager")
            .field("peers", &self.peers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_list_is_recorded_verbatim() {
        let manager = ReplicationManager::new(
            vec!["localhost:50052".to_string(), "localhost:50053".to_string()],
            ReplicationConfig::default(),
        );
        assert_eq!(manager.peer_count(), 2);
    }

    #[tokio::test]
    async fn replicate_with_no_peers_returns_immediately() {
        let manager = Arc::new(ReplicationManager::new(vec![], ReplicationConfig::default()));
        manager.replicate_put("k".to_string(), "v".to_string()).await;
        manager.replicate_delete("k".to_string()).await;
    }

    #[tokio::test]
    async fn unreachable_peer_exhausts_retries_without_panicking() {
        let mut config = ReplicationConfig::default();
        config.initial_backoff_ms = 1;
        config.max_backoff_ms = 2;
        config.attempt_timeout_ms = 50;
        config.max_retries = 2;
        let manager = Arc::new(ReplicationManager::new(
            vec!["127.0.0.1:1".to_string()],
            config,
        ));
        manager
            .replicate_put("k".to_string(), "v".to_string())
            .await;
    }
}
