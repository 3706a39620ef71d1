//! Configuration parsing and validation.
//!
//! Client configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the read path's components: dispatch and reconciliation,
//! read repair, connection pooling, routing and namespaces.

use crate::control::routing::{RouterVersion, RoutingTable};
use crate::net::pool::PoolConfig;
use crate::read::executor::ReadOptions;
use crate::read::reconciler::ConflictPolicy;
use crate::read::repair::RepairOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Dispatch, concurrency and reconciliation settings.
    #[serde(default)]
    pub read: ReadConfig,

    /// Read repair settings for multi-read namespaces.
    #[serde(default)]
    pub repair: RepairConfig,

    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolSection,

    /// Initial routing table.
    pub routing: RoutingConfig,

    /// Namespaces this client may read.
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Read path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    /// Per-key bound on waiting for replica answers.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Optional bound on a whole request.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Maximum keys dispatched concurrently across all requests.
    #[serde(default = "default_max_inflight_keys")]
    pub max_inflight_keys: usize,

    /// Canonical value selection for multi-read namespaces.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            request_timeout_ms: None,
            max_inflight_keys: default_max_inflight_keys(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

/// Read repair configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Schedule repair writes when replicas diverge.
    #[serde(default = "default_repair_enabled")]
    pub enabled: bool,

    /// Bound on each repair write.
    #[serde(default = "default_repair_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: default_repair_enabled(),
            timeout_ms: default_repair_timeout_ms(),
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    /// Maximum open connections per replica.
    #[serde(default = "default_max_connections_per_replica")]
    pub max_connections_per_replica: usize,

    /// Maximum idle connections kept per replica.
    #[serde(default = "default_max_idle_per_replica")]
    pub max_idle_per_replica: usize,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_connections_per_replica: default_max_connections_per_replica(),
            max_idle_per_replica: default_max_idle_per_replica(),
        }
    }
}

/// Initial routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Router version of the initial table.
    #[serde(default = "default_router_version")]
    pub router_version: u64,

    /// Hash seed for routing stability.
    #[serde(default)]
    pub hash_seed: u64,

    /// Number of shards in the keyspace.
    pub shard_count: u32,
}

/// A namespace definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub name: String,
    pub id: u32,
    #[serde(default = "default_copy_count")]
    pub copy_count: u32,
    #[serde(default)]
    pub multi_read: bool,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_dispatch_timeout_ms() -> u64 {
    500
}

fn default_max_inflight_keys() -> usize {
    64
}

fn default_repair_enabled() -> bool {
    true
}

fn default_repair_timeout_ms() -> u64 {
    1_000
}

fn default_max_connections_per_replica() -> usize {
    8
}

fn default_max_idle_per_replica() -> usize {
    4
}

fn default_router_version() -> u64 {
    1
}

fn default_copy_count() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(timeout_ms) = overrides.dispatch_timeout_ms {
            self.read.dispatch_timeout_ms = timeout_ms;
        }
        if let Some(max_inflight) = overrides.max_inflight_keys {
            self.read.max_inflight_keys = max_inflight;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_read()?;
        self.validate_repair()?;
        self.validate_pool()?;
        self.validate_routing()?;
        self.validate_namespaces()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_read(&self) -> Result<()> {
        if self.read.dispatch_timeout_ms == 0 {
            anyhow::bail!("read.dispatch_timeout_ms must be > 0");
        }
        if self.read.max_inflight_keys == 0 {
            anyhow::bail!("read.max_inflight_keys must be > 0");
        }
        if self.read.max_inflight_keys > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "read.max_inflight_keys must be <= {}, got: {}",
                Semaphore::MAX_PERMITS,
                self.read.max_inflight_keys
            );
        }
        if let Some(request_timeout_ms) = self.read.request_timeout_ms {
            if request_timeout_ms == 0 {
                anyhow::bail!("read.request_timeout_ms must be > 0 when set");
            }
        }
        Ok(())
    }

    fn validate_repair(&self) -> Result<()> {
        if self.repair.enabled && self.repair.timeout_ms == 0 {
            anyhow::bail!("repair.timeout_ms must be > 0 when repair is enabled");
        }
        Ok(())
    }

    fn validate_pool(&self) -> Result<()> {
        if self.pool.max_connections_per_replica == 0 {
            anyhow::bail!("pool.max_connections_per_replica must be > 0");
        }
        if self.pool.max_connections_per_replica > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "pool.max_connections_per_replica must be <= {}, got: {}",
                Semaphore::MAX_PERMITS,
                self.pool.max_connections_per_replica
            );
        }
        if self.pool.max_idle_per_replica > self.pool.max_connections_per_replica {
            anyhow::bail!(
                "pool.max_idle_per_replica ({}) cannot exceed pool.max_connections_per_replica ({})",
                self.pool.max_idle_per_replica,
                self.pool.max_connections_per_replica
            );
        }
        Ok(())
    }

    fn validate_routing(&self) -> Result<()> {
        if self.routing.shard_count == 0 {
            anyhow::bail!("routing.shard_count must be > 0");
        }
        Ok(())
    }

    fn validate_namespaces(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for ns in &self.namespaces {
            if ns.name.is_empty() {
                anyhow::bail!("namespace name must not be empty");
            }
            if ns.copy_count == 0 {
                anyhow::bail!("namespace {}: copy_count must be >= 1", ns.name);
            }
            if !names.insert(ns.name.as_str()) {
                anyhow::bail!("duplicate namespace name: {}", ns.name);
            }
            if !ids.insert(ns.id) {
                anyhow::bail!("duplicate namespace id {} ({})", ns.id, ns.name);
            }
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    /// Routing table described by the `[routing]` section.
    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::new(
            RouterVersion(self.routing.router_version),
            self.routing.hash_seed,
            self.routing.shard_count,
        )
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            dispatch_timeout: Duration::from_millis(self.read.dispatch_timeout_ms),
            request_timeout: self.read.request_timeout_ms.map(Duration::from_millis),
            max_inflight_keys: self.read.max_inflight_keys,
            conflict_policy: self.read.conflict_policy,
        }
    }

    pub fn repair_options(&self) -> RepairOptions {
        RepairOptions {
            enabled: self.repair.enabled,
            timeout: Duration::from_millis(self.repair.timeout_ms),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections_per_replica: self.pool.max_connections_per_replica,
            max_idle_per_replica: self.pool.max_idle_per_replica,
        }
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override per-key dispatch timeout.
    pub dispatch_timeout_ms: Option<u64>,
    /// Override the in-flight key ceiling.
    pub max_inflight_keys: Option<usize>,
}
