// src/client.rs

//! A thin convenience wrapper around the generated tonic client stub.
//!
//! No retry-on-disconnect or round-robin policy is implemented here; that is
//! explicitly out of scope. Callers needing fault tolerance should retry at
//! their own layer.

use crate::proto::key_value_store_client::KeyValueStoreClient;
use crate::proto::{Empty, Key, KeyValue};
use tonic::transport::Channel;
use tonic::Status;

pub struct KvClient {
    inner: KeyValueStoreClient<Channel>,
}

impl KvClient {
    /// Connects to a node at `addr`, e.g. `"http://127.0.0.1:50051"`.
    pub async fn connect(addr: impl Into<String>) -> Result<Self, tonic::transport::Error> {
        let inner = KeyValueStoreClient::connect(addr.into()).await?;
        Ok(Self { inner })
    }

    pub async fn ping(&mut self) -> Result<String, Status> {
        let resp = self.inner.ping(Empty {}).await?;
        Ok(resp.into_inner().message)
    }

    /// Returns the prior value for `key`, if any.
    pub async fn put(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>, Status> {
        let resp = self
            .inner
            .put(KeyValue {
                key: key.into(),
                value: value.into(),
                no_replicate: false,
            })
            .await?;
        let old_value = resp.into_inner().old_value;
        Ok(if old_value.is_empty() {
            None
        } else {
            Some(old_value)
        })
    }

    /// Returns `Ok(None)` if the key is absent, rather than surfacing the
    /// `NOT_FOUND` status as an error.
    pub async fn get(&mut self, key: impl Into<String>) -> Result<Option<String>, Status> {
        let request = Key {
            key: key.into(),
            no_replicate: false,
        };
        match self.inner.get(request).await {
            Ok(resp) => Ok(Some(resp.into_inner().value)),
            Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
            Err(status) => Err(status),
        }
    }

    pub async fn delete(&mut self, key: impl Into<String>) -> Result<(), Status> {
        self.inner
            .delete(Key {
                key: key.into(),
                no_replicate: false,
            })
            .await?;
        Ok(())
    }

    pub async fn list_keys(&mut self) -> Result<Vec<String>, Status> {
        let resp = self.inner.list_keys(Empty {}).await?;
        Ok(resp.into_inner().keys)
    }

    pub async fn backup(&mut self) -> Result<(bool, String), Status> {
        let resp = self.inner.backup(Empty {}).await?;
        let status = resp.into_inner();
        Ok((status.success, status.message))
    }
}
