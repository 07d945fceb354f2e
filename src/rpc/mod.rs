// src/rpc/mod.rs

//! Adapts wire requests onto the storage/worker/replication stack and back.
//!
//! This is the one place origin-tagging is decided: a mutation only fans
//! out to peers when it did not itself arrive as a peer's replicated call
//! (`no_replicate` unset), which is what breaks the infinite replication
//! storm an untagged design would produce (I5).

use crate::error::KvError;
use crate::proto::key_value_store_server::KeyValueStore;
use crate::proto::{
    BackupStatus, Empty, Key, KeyList, KeyValue, OldValue, PingResponse, Value,
};
use crate::replication::ReplicationManager;
use crate::worker::WorkerPool;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

/// The node's `KeyValueStore` RPC implementation. Cheaply cloneable: every
/// field is already reference-counted or `Clone`-derived internally.
#[derive(Clone)]
pub struct Servicer {
    workers: Arc<WorkerPool>,
    replication: Arc<ReplicationManager>,
    backup_path: std::path::PathBuf,
}

impl Servicer {
    pub fn new(
        workers: Arc<WorkerPool>,
        replication: Arc<ReplicationManager>,
        backup_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            workers,
            replication,
            backup_path: backup_path.into(),
        }
    }
}

#[tonic::async_trait]
impl KeyValueStore for Servicer {
    #[instrument(skip(self, _request))]
    async fn ping(&self, _request: Request<Empty>) -> Result<Response<PingResponse>, Status> {
        Ok(Response::new(PingResponse {
            message: "OK".to_string(),
        }))
    }

    #[instrument(skip(self, request), fields(key))]
    async fn put(&self, request: Request<KeyValue>) -> Result<Response<OldValue>, Status> {
        let KeyValue {
            key,
            value,
            no_replicate,
        } = request.into_inner();
        if key.is_empty() {
            return Err(KvError::InvalidArgument("key must not be empty".to_string()).into());
        }

        let old_value = self
            .workers
            .put(key.clone(), value.clone().into_bytes())
            .await
            .map_err(Status::from)?;

        if !no_replicate {
            let replication = self.replication.clone();
            tokio::spawn(async move {
                replication.replicate_put(key, value).await;
            });
        }

        Ok(Response::new(OldValue {
            old_value: old_value.unwrap_or_default(),
        }))
    }

    #[instrument(skip(self, request), fields(key))]
    async fn get(&self, request: Request<Key>) -> Result<Response<Value>, Status> {
        let Key { key, .. } = request.into_inner();
        match self.workers.get(key).await.map_err(Status::from)? {
            Some(value) => Ok(Response::new(Value { value })),
            None => Err(KvError::NotFound.into()),
        }
    }

    #[instrument(skip(self, request), fields(key))]
    async fn delete(&self, request: Request<Key>) -> Result<Response<Empty>, Status> {
        let Key { key, no_replicate } = request.into_inner();
        self.workers.delete(key.clone()).await.map_err(Status::from)?;

        if !no_replicate {
            let replication = self.replication.clone();
            tokio::spawn(async move {
                replication.replicate_delete(key).await;
            });
        }

        Ok(Response::new(Empty {}))
    }

    #[instrument(skip(self, _request))]
    async fn list_keys(&self, _request: Request<Empty>) -> Result<Response<KeyList>, Status> {
        let keys = self.workers.list_keys().await.map_err(Status::from)?;
        Ok(Response::new(KeyList { keys }))
    }

    #[instrument(skip(self, _request))]
    async fn backup(&self, _request: Request<Empty>) -> Result<Response<BackupStatus>, Status> {
        match self.workers.backup(self.backup_path.clone()).await {
            Ok(()) => {
                info!("backup written to {:?}", self.backup_path);
                Ok(Response::new(BackupStatus {
                    success: true,
                    message: format!("backup written to {:?}", self.backup_path),
                }))
            }
            Err(e) => Ok(Response::new(BackupStatus {
                success: false,
                message: e.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use tempfile::tempdir;
    use tonic::Request;

    fn build_servicer(dir: &tempfile::TempDir) -> Servicer {
        let workers =
            Arc::new(WorkerPool::spawn(dir.path().join("rpc.redb"), 0, 2).unwrap());
        let replication = Arc::new(ReplicationManager::new(vec![], ReplicationConfig::default()));
        Servicer::new(workers, replication, dir.path().join("backup.redb"))
    }

    #[tokio::test]
    async fn ping_replies_ok() {
        let dir = tempdir().unwrap();
        let servicer = build_servicer(&dir);
        let resp = servicer.ping(Request::new(Empty {})).await.unwrap();
        assert_eq!(resp.into_inner().message, "OK");
    }

    #[tokio::test]
    async fn get_on_absent_key_is_not_found() {
        let dir = tempdir().unwrap();
        let servicer = build_servicer(&dir);
        let err = servicer
            .get(Request::new(Key {
                key: "missing".to_string(),
                no_replicate: false,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_and_reports_prior_value() {
        let dir = tempdir().unwrap();
        let servicer = build_servicer(&dir);

        let resp = servicer
            .put(Request::new(KeyValue {
                key: "k".to_string(),
                value: "v1".to_string(),
                no_replicate: true,
            }))
            .await
            .unwrap();
        assert_eq!(resp.into_inner().old_value, "");

        let resp = servicer
            .put(Request::new(KeyValue {
                key: "k".to_string(),
                value: "v2".to_string(),
                no_replicate: true,
            }))
            .await
            .unwrap();
        assert_eq!(resp.into_inner().old_value, "v1");

        let resp = servicer
            .get(Request::new(Key {
                key: "k".to_string(),
                no_replicate: false,
            }))
            .await
            .unwrap();
        assert_eq!(resp.into_inner().value, "v2");
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let dir = tempdir().unwrap();
        let servicer = build_servicer(&dir);
        let err = servicer
            .put(Request::new(KeyValue {
                key: String::new(),
                value: "v".to_string(),
                no_replicate: true,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn delete_then_list_keys_reflects_removal() {
        let dir = tempdir().unwrap();
        let servicer = build_servicer(&dir);

        servicer
            .put(Request::new(KeyValue {
                key: "a".to_string(),
                value: "1".to_string(),
                no_replicate: true,
            }))
            .await
            .unwrap();
        servicer
            .put(Request::new(KeyValue {
                key: "b".to_string(),
                value: "2".to_string(),
                no_replicate: true,
            }))
            .await
            .unwrap();
        servicer
            .delete(Request::new(Key {
                key: "a".to_string(),
                no_replicate: true,
            }))
            .await
            .unwrap();

        let mut keys = servicer
            .list_keys(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner()
            .keys;
        keys.sort();
        assert_eq!(keys, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn backup_reports_success() {
        let dir = tempdir().unwrap();
        let servicer = build_servicer(&dir);
        servicer
            .put(Request::new(KeyValue {
                key: "k".to_string(),
                value: "v".to_string(),
                no_replicate: true,
            }))
            .await
            .unwrap();

        let resp = servicer
            .backup(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.success);
    }
}
