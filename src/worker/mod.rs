// src/worker/mod.rs

//! Decouples the concurrent RPC layer from the single-writer storage engine.
//!
//! Per the redesign called for in the source design's critical ordering
//! caveat, each task carries its own one-shot reply channel rather than
//! relying on a shared results queue paired by caller discipline — there is
//! no cross-caller correlation hazard to guard against here.

use crate::error::KvError;
use crate::storage::StorageEngine;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

/// One unit of storage work. Mirrors the source design's `(op, key,
/// value?)` tuple, made a proper tagged sum type per the redesign guidance
/// in place of duck-typed tuples.
enum Op {
    Put { key: String, value: Vec<u8> },
    Get { key: String },
    Delete { key: String },
    ListKeys,
    Backup { backup_path: std::path::PathBuf },
}

/// The payload carried back on a task's reply channel.
#[derive(Debug, Clone)]
enum TaskResult {
    /// Prior value for `Get`/`Put`; `None` if the key was absent.
    Value(Option<String>),
    /// `Delete` acknowledgement.
    Deleted,
    /// The full key set, for `ListKeys`.
    Keys(Vec<String>),
    /// `Backup` completed successfully.
    BackedUp,
}

type Reply = oneshot::Sender<Result<TaskResult, KvError>>;

struct Task {
    op: Op,
    reply: Reply,
}

/// A bounded pool of worker tasks sharing one [`StorageEngine`] handle.
/// Serializes the *submission* of storage operations from many concurrent
/// RPC handlers onto `N` executors; I1 (single-writer-per-engine) is
/// enforced by the engine's own MVCC transaction layer, not by this pool
/// acting as a mutex.
pub struct WorkerPool {
    tasks_tx: mpsc::Sender<Task>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Opens the engine at `storage_path` once and spawns `worker_count`
    /// workers sharing a `.clone()` of that single handle. `StorageEngine`
    /// wraps an `Arc<Database>` precisely so it can be shared this way;
    /// `redb` allows only one `Database` to hold a given file open at a
    /// time, so re-opening per worker is not an option.
    pub fn spawn(
        storage_path: impl AsRef<std::path::Path>,
        max_size_bytes: u64,
        worker_count: usize,
    ) -> Result<Self, KvError> {
        let engine = StorageEngine::open(storage_path.as_ref(), max_size_bytes)?;

        let (tasks_tx, tasks_rx) = mpsc::channel(1024);
        let tasks_rx = std::sync::Arc::new(tokio::sync::Mutex::new(tasks_rx));

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let engine = engine.clone();
            let tasks_rx = tasks_rx.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(id, engine, tasks_rx).await;
            }));
        }

        Ok(Self { tasks_tx, handles })
    }

    async fn submit(&self, op: Op) -> Result<TaskResult, KvError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tasks_tx
            .send(Task { op, reply })
            .await
            .map_err(|_| KvError::WorkerUnavailable("task queue closed".to_string()))?;

        reply_rx
            .await
            .map_err(|_| KvError::WorkerUnavailable("worker dropped without replying".to_string()))?
    }

    /// Stores `(key, value)` and returns the prior value, if any.
    pub async fn put(&self, key: String, value: Vec<u8>) -> Result<Option<String>, KvError> {
        match self.submit(Op::Put { key, value }).await? {
            TaskResult::Value(old) => Ok(old),
            other => unreachable_result("put", other),
        }
    }

    /// Returns the value for `key`, or `None` if absent.
    pub async fn get(&self, key: String) -> Result<Option<String>, KvError> {
        match self.submit(Op::Get { key }).await? {
            TaskResult::Value(v) => Ok(v),
            other => unreachable_result("get", other),
        }
    }

    /// Deletes `key`, if present.
    pub async fn delete(&self, key: String) -> Result<(), KvError> {
        match self.submit(Op::Delete { key }).await? {
            TaskResult::Deleted => Ok(()),
            other => unreachable_result("delete", other),
        }
    }

    /// Returns every stored key.
    pub async fn list_keys(&self) -> Result<Vec<String>, KvError> {
        match self.submit(Op::ListKeys).await? {
            TaskResult::Keys(keys) => Ok(keys),
            other => unreachable_result("list_keys", other),
        }
    }

    /// Snapshots the engine to `backup_path`.
    pub async fn backup(&self, backup_path: std::path::PathBuf) -> Result<(), KvError> {
        match self.submit(Op::Backup { backup_path }).await? {
            TaskResult::BackedUp => Ok(()),
            other => unreachable_result("backup", other),
        }
    }

    /// Stops accepting new work and waits for in-flight tasks to drain.
    /// Dropping the sender closes the channel, which doubles as each
    /// worker's `Stop` sentinel — a closed mpsc channel already
    /// communicates it, so there is no dedicated `Stop` variant.
    pub async fn shutdown(self) {
        drop(self.tasks_tx);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("worker task panicked during shutdown: {e:?}");
            }
        }
        info!("worker pool shut down gracefully");
    }
}

fn unreachable_result(op: &str, result: TaskResult) -> ! {
    unreachable!("worker returned a result shape that doesn't match '{op}': {result:?}")
}

async fn worker_loop(
    id: usize,
    engine: StorageEngine,
    tasks_rx: std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
) {
    info!("storage worker {id} started");
    loop {
        let task = {
            let mut rx = tasks_rx.lock().await;
            rx.recv().await
        };
        let Some(Task { op, reply }) = task else {
            break;
        };

        let result = match op {
            Op::Put { key, value } => (|| {
                let old = engine.get(&key)?;
                engine.put(&key, &value)?;
                Ok(TaskResult::Value(old))
            })(),
            Op::Get { key } => engine.get(&key).map(TaskResult::Value),
            Op::Delete { key } => engine.delete(&key).map(|()| TaskResult::Deleted),
            Op::ListKeys => engine.list_keys().map(TaskResult::Keys),
            Op::Backup { backup_path } => engine.backup(&backup_path).map(|()| TaskResult::BackedUp),
        };
        let _ = reply.send(result);
    }
    info!("storage worker {id} stopped");
}
