use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cluster::coordinator::CoordinatorConfig;
use crate::cluster::distributed_lock::LockOptions;
use crate::cluster::session_store::SessionStoreConfig;
use crate::common::keys::{DEFAULT_KEY_PREFIX, Keyspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default = "default_store_type")]
    pub store_type: StorageType,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,
    #[serde(default = "default_node_ttl_ms")]
    pub node_ttl_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_session_cleanup_interval_secs")]
    pub session_cleanup_interval_secs: u64,

    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
    #[serde(default = "default_lock_max_retries")]
    pub lock_max_retries: u32,
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_store_type() -> StorageType {
    StorageType::Redis
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}
fn default_heartbeat_interval_ms() -> u64 {
    5_000
}
fn default_discovery_interval_ms() -> u64 {
    10_000
}
fn default_node_timeout_ms() -> u64 {
    30_000
}
fn default_node_ttl_ms() -> u64 {
    30_000
}
fn default_shutdown_timeout_ms() -> u64 {
    5_000
}
fn default_session_ttl_secs() -> u64 {
    30 * 60
}
fn default_session_cleanup_interval_secs() -> u64 {
    5 * 60
}
fn default_lock_ttl_ms() -> u64 {
    30_000
}
fn default_lock_retry_delay_ms() -> u64 {
    100
}
fn default_lock_max_retries() -> u32 {
    10
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            hostname: String::new(),
            ip: String::new(),
            port: default_port(),
            metadata: HashMap::new(),
            store_type: default_store_type(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            discovery_interval_ms: default_discovery_interval_ms(),
            node_timeout_ms: default_node_timeout_ms(),
            node_ttl_ms: default_node_ttl_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            session_ttl_secs: default_session_ttl_secs(),
            session_cleanup_interval_secs: default_session_cleanup_interval_secs(),
            lock_ttl_ms: default_lock_ttl_ms(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            lock_max_retries: default_lock_max_retries(),
        }
    }
}

impl ClusterConfig {
    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(self.key_prefix.clone())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            node_id: self.node_id.clone(),
            hostname: self.hostname.clone(),
            ip: self.ip.clone(),
            port: self.port,
            metadata: self.metadata.clone(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            discovery_interval: Duration::from_millis(self.discovery_interval_ms),
            node_timeout: Duration::from_millis(self.node_timeout_ms),
            node_ttl: Duration::from_millis(self.node_ttl_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }

    pub fn session_store_config(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            node_id: self.node_id.clone(),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            cleanup_interval: Duration::from_secs(self.session_cleanup_interval_secs),
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: Duration::from_millis(self.lock_ttl_ms),
            retry_delay: Duration::from_millis(self.lock_retry_delay_ms),
            max_retries: self.lock_max_retries,
        }
    }
}

/// Loads the cluster config from an optional file overlaid with `OVNCP_*`
/// environment variables.
pub fn load_cluster_config(path: &str) -> Result<ClusterConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("OVNCP").try_parsing(true))
        .build()
        .with_context(|| format!("failed to read cluster config from {}", path))?;
    let config = settings
        .try_deserialize::<ClusterConfig>()
        .context("invalid cluster config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_cluster_config("does/not/exist/cluster").unwrap();
        assert_eq!(config.key_prefix, "ovncp:");
        assert_eq!(config.heartbeat_interval_ms, 5_000);
        assert_eq!(config.store_type, StorageType::Redis);
        assert!(!config.node_id.is_empty());

        let coord = config.coordinator_config();
        assert_eq!(coord.node_ttl, Duration::from_secs(30));
        assert!(coord.discovery_interval > coord.heartbeat_interval);
        assert_eq!(config.lock_options().max_retries, 10);
    }
}
