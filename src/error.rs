// src/error.rs

//! Defines the primary error type shared by every layer of the node.

use thiserror::Error;

/// Domain-level errors produced by the storage engine, worker pool, and
/// replication manager. `thiserror` gives each variant a wire-ready message
/// and lets callers use `?` across layer boundaries; translation to a
/// `tonic::Status` happens at the RPC boundary in [`crate::rpc`].
#[derive(Error, Debug)]
pub enum KvError {
    /// The requested key has no record in the engine.
    #[error("key not found")]
    NotFound,

    /// A malformed key or value was rejected before it reached storage.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedded engine reported an I/O, map-full, or corruption failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A worker returned a value of the wrong shape for the requested
    /// operation (e.g. a non-UTF-8 value on `Get`, a non-string key on
    /// `ListKeys`). Rust's type system makes this structurally unreachable
    /// here, since `Task`/`TaskResult` are tagged enums rather than the
    /// duck-typed tuples of the original design — kept as a variant so the
    /// error taxonomy still names it, per the source design's policy.
    #[error("invalid data type returned: {0}")]
    TypeViolation(String),

    /// A peer could not be reached after exhausting the retry budget.
    /// Never surfaced to a client; logged by the replication manager only.
    #[error("replication to {peer} failed: {reason}")]
    ReplicationFailure { peer: String, reason: String },

    /// The worker pool's task channel or the engine handle went away —
    /// indicates the node is shutting down or a worker panicked.
    #[error("worker pool unavailable: {0}")]
    WorkerUnavailable(String),
}

impl From<KvError> for tonic::Status {
    fn from(err: KvError) -> Self {
        match err {
            KvError::NotFound => tonic::Status::not_found(err.to_string()),
            KvError::InvalidArgument(_) => tonic::Status::invalid_argument(err.to_string()),
            KvError::Storage(_) | KvError::WorkerUnavailable(_) => {
                tonic::Status::unknown(err.to_string())
            }
            KvError::TypeViolation(_) => tonic::Status::unknown(err.to_string()),
            KvError::ReplicationFailure { .. } => tonic::Status::internal(err.to_string()),
        }
    }
}
