//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;` in test
//! files.

#![allow(dead_code)]

use lattice_read::control::routing::{PhysicalKey, PhysicalShard};
use lattice_read::core::config::ClientConfig;
use lattice_read::net::memory::InMemoryCluster;
use lattice_read::{LogicalKey, ReadClient, ReadResult, Value};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Create a minimal valid configuration file with one namespace.
pub fn create_minimal_config() -> NamedTempFile {
    write_config(
        r#"
[routing]
shard_count = 16

[[namespaces]]
name = "users"
id = 1
copy_count = 3
"#,
    )
}

/// Create a configuration with custom read settings and one namespace.
pub fn create_config_with_settings(
    copy_count: u32,
    multi_read: bool,
    dispatch_timeout_ms: u64,
    max_inflight_keys: usize,
) -> NamedTempFile {
    write_config(&config_text(
        copy_count,
        multi_read,
        dispatch_timeout_ms,
        max_inflight_keys,
    ))
}

/// Write config text to a temp file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> ClientConfig {
    ClientConfig::from_file(file.path()).expect("Failed to load config")
}

/// Config text with one "users" namespace.
pub fn config_text(
    copy_count: u32,
    multi_read: bool,
    dispatch_timeout_ms: u64,
    max_inflight_keys: usize,
) -> String {
    format!(
        r#"
[read]
dispatch_timeout_ms = {}
max_inflight_keys = {}

[routing]
router_version = 1
hash_seed = 42
shard_count = 16

[[namespaces]]
name = "users"
id = 1
copy_count = {}
multi_read = {}
"#,
        dispatch_timeout_ms, max_inflight_keys, copy_count, multi_read
    )
}

/// A client reading from an in-memory cluster.
pub struct TestBed {
    pub config: ClientConfig,
    pub cluster: Arc<InMemoryCluster>,
    pub client: ReadClient,
}

impl TestBed {
    /// Build from config text over a cluster with `replicas` nodes.
    pub fn from_toml(replicas: usize, content: &str) -> Self {
        let config = ClientConfig::from_toml(content).expect("Failed to parse config");
        let cluster = Arc::new(InMemoryCluster::new(replicas));
        let client = ReadClient::with_hash_routing(&config, cluster.clone())
            .expect("Failed to build client");
        Self {
            config,
            cluster,
            client,
        }
    }

    /// One "users" namespace with `copy_count` replicas on a cluster of the
    /// same size.
    pub fn users(copy_count: u32, multi_read: bool) -> Self {
        Self::from_toml(
            copy_count as usize,
            &config_text(copy_count, multi_read, 200, 64),
        )
    }

    /// Physical key of a logical key in a configured namespace.
    pub fn physical(&self, namespace: &str, key: &str) -> PhysicalKey {
        let ns = self
            .client
            .namespace(namespace)
            .expect("namespace not configured");
        PhysicalKey::build(&ns, &LogicalKey::from(key))
    }

    /// Shard a key routes to under the configured routing table.
    pub fn shard_of(&self, namespace: &str, key: &str) -> PhysicalShard {
        let ns = self
            .client
            .namespace(namespace)
            .expect("namespace not configured");
        self.config
            .routing_table()
            .route_key(ns.id, key.as_bytes())
            .expect("key does not route")
    }

    /// Store the same value on every replica.
    pub fn put_everywhere(&self, namespace: &str, key: &str, value: &str) {
        self.cluster
            .put_all(self.physical(namespace, key), Value::new(value.to_string()));
    }

    /// Read a batch of string keys.
    pub async fn get_many(&self, namespace: &str, keys: &[&str]) -> Vec<ReadResult<Option<Value>>> {
        let keys = logical_keys(keys);
        self.client
            .get_many(namespace, &keys)
            .await
            .expect("namespace not configured")
    }
}

/// Convert string keys to logical keys.
pub fn logical_keys(keys: &[&str]) -> Vec<LogicalKey> {
    keys.iter().map(|k| LogicalKey::from(*k)).collect()
}

/// Generate `count` distinct keys with a prefix.
pub fn numbered_keys(prefix: &str, count: usize) -> Vec<LogicalKey> {
    (0..count)
        .map(|i| LogicalKey::from(format!("{}-{:04}", prefix, i)))
        .collect()
}

/// Assert that a result is Ok and return the value.
#[track_caller]
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a result is Err.
#[track_caller]
pub fn assert_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_minimal_config() {
        let file = create_minimal_config();
        let config = load_config(&file);
        assert_eq!(config.namespaces[0].name, "users");
        assert_eq!(config.namespaces[0].copy_count, 3);
    }

    #[test]
    fn test_create_config_with_settings() {
        let file = create_config_with_settings(2, true, 75, 5);
        let config = load_config(&file);
        assert_eq!(config.read.dispatch_timeout_ms, 75);
        assert_eq!(config.read.max_inflight_keys, 5);
        assert!(config.namespaces[0].multi_read);
    }
}
