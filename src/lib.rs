// src/lib.rs

pub mod client;
pub mod config;
pub mod error;
pub mod replication;
pub mod rpc;
pub mod server;
pub mod storage;
pub mod worker;

/// Generated gRPC types and service traits for the `kvstore.v1` package.
pub mod proto {
    tonic::include_proto!("kvstore.v1");
}
