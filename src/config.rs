// src/config.rs

//! Manages node configuration: loading from TOML, validating, and resolving
//! the peer list against the node's own address.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

/// Top-level node configuration, deserialized from a TOML file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Number of worker tasks serializing storage operations.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    50051
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_workers() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            workers: default_workers(),
            storage: StorageConfig::default(),
            backup: BackupConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

/// Settings for the embedded storage engine.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Maximum on-disk size, in bytes. `put` is rejected once the engine
    /// file would grow past this. `0` disables the check.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

fn default_storage_path() -> String {
    "kvstore.redb".to_string()
}
fn default_max_size_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

/// Settings for the `Backup` RPC's target location.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_backup_path")]
    pub path: String,
}

fn default_backup_path() -> String {
    "kvstore_backup.redb".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            path: default_backup_path(),
        }
    }
}

/// Settings for the best-effort peer replication fan-out.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_attempt_timeout_ms() -> u64 {
    3000
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl Config {
    /// Reads and parses a TOML configuration file, then validates it.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration and warns about the "exclude self"
    /// invariant (I3/I5) if the node's own address appears in its peer list.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers cannot be 0"));
        }
        if self.replication.max_retries == 0 {
            return Err(anyhow!("replication.max_retries cannot be 0"));
        }

        let own_addr = format!("{}:{}", self.host, self.port);
        if self.replication.peers.iter().any(|p| p == &own_addr) {
            warn!(
                "node's own address '{}' appears in its configured peer list; it will be excluded at runtime (I3/I5)",
                own_addr
            );
        }

        Ok(())
    }

    /// The configured peer list with this node's own address removed,
    /// enforcing I3 (peer list stability) and I5 (no self-replication).
    pub fn effective_peers(&self) -> Vec<String> {
        let own_addr = format!("{}:{}", self.host, self.port);
        self.replication
            .peers
            .iter()
            .filter(|p| *p != &own_addr)
            .cloned()
            .collect()
    }
}
