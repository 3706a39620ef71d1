//! Key routing and router versions.
//!
//! Keys are routed to shards using a versioned hash:
//! `shard = hash64(namespace_id, key_bytes, hash_seed) % shard_count`
//!
//! Every read operation captures one [`RouterVersion`] before splitting and
//! resolves all of its keys against that snapshot. Tables for older versions
//! stay resolvable until they are retired, so operations that started before
//! a table flip finish on the table they began with.

use crate::control::namespace::Namespace;
use crate::core::error::ResolutionError;
use crate::core::types::LogicalKey;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use twox_hash::XxHash64;

/// Version stamp of a shard-table snapshot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RouterVersion(pub u64);

impl std::fmt::Display for RouterVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Shard coordinate produced by key resolution.
///
/// The read path only compares shards; it never interprets the vnode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalShard {
    pub vnode: u32,
}

impl PhysicalShard {
    pub const fn new(vnode: u32) -> Self {
        Self { vnode }
    }
}

impl std::fmt::Display for PhysicalShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vnode-{}", self.vnode)
    }
}

/// Namespace-qualified key as sent to replicas: `"<namespace_id>:" ++ key`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalKey(Bytes);

impl PhysicalKey {
    /// Build the physical key for a logical key in a namespace.
    pub fn build(namespace: &Namespace, key: &LogicalKey) -> Self {
        let prefix = namespace.id.to_string();
        let mut buf = BytesMut::with_capacity(prefix.len() + 1 + key.len());
        buf.put_slice(prefix.as_bytes());
        buf.put_u8(b':');
        buf.put_slice(key.as_bytes());
        Self(buf.freeze())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Maps logical keys to physical shards.
///
/// Implementations must be safe to call concurrently; the read path calls
/// [`current_version`](KeyResolver::current_version) once per operation and
/// then [`resolve`](KeyResolver::resolve) once per key.
pub trait KeyResolver: Send + Sync {
    /// The router version new operations should use.
    fn current_version(&self) -> RouterVersion;

    /// Resolve a key against the table for `version`.
    fn resolve(
        &self,
        namespace: &Namespace,
        key: &LogicalKey,
        version: RouterVersion,
    ) -> Result<PhysicalShard, ResolutionError>;
}

/// Routing table for one router version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Version this table was published under.
    pub version: RouterVersion,
    /// Hash seed for routing stability.
    pub hash_seed: u64,
    /// Number of shards (vnodes) in the keyspace.
    pub shard_count: u32,
}

impl RoutingTable {
    /// Create a new routing table.
    pub fn new(version: RouterVersion, hash_seed: u64, shard_count: u32) -> Self {
        Self {
            version,
            hash_seed,
            shard_count,
        }
    }

    /// Route a key to its shard.
    pub fn route_key(
        &self,
        namespace_id: u32,
        key: &[u8],
    ) -> Result<PhysicalShard, ResolutionError> {
        if key.is_empty() {
            return Err(ResolutionError::EmptyKey);
        }
        if self.shard_count == 0 {
            return Err(ResolutionError::NoShards {
                version: self.version,
            });
        }
        let hash = compute_routing_hash(namespace_id, key, self.hash_seed);
        Ok(PhysicalShard::new((hash % u64::from(self.shard_count)) as u32))
    }
}

/// Hash-based resolver holding one routing table per router version.
pub struct HashKeyResolver {
    tables: RwLock<BTreeMap<RouterVersion, RoutingTable>>,
    current: AtomicU64,
}

impl HashKeyResolver {
    /// Create a resolver serving a single table.
    pub fn new(table: RoutingTable) -> Self {
        let current = AtomicU64::new(table.version.0);
        let mut tables = BTreeMap::new();
        tables.insert(table.version, table);
        Self {
            tables: RwLock::new(tables),
            current,
        }
    }

    /// Publish a routing table.
    ///
    /// A table newer than the current version becomes current; older tables
    /// are only added for operations still pinned to them.
    pub fn install(&self, table: RoutingTable) {
        let version = table.version;
        self.tables.write().insert(version, table);

        let previous = self.current.fetch_max(version.0, Ordering::AcqRel);
        if version.0 > previous {
            tracing::info!(
                old_version = previous,
                new_version = version.0,
                "router version advanced"
            );
        }
    }

    /// Drop tables older than `floor`. The current table is never dropped.
    pub fn retire_before(&self, floor: RouterVersion) -> usize {
        let current = self.current_version();
        let mut tables = self.tables.write();
        let before = tables.len();
        tables.retain(|version, _| *version >= floor || *version == current);
        before - tables.len()
    }

    /// Versions currently resolvable, oldest first.
    pub fn versions(&self) -> Vec<RouterVersion> {
        self.tables.read().keys().copied().collect()
    }
}

impl KeyResolver for HashKeyResolver {
    fn current_version(&self) -> RouterVersion {
        RouterVersion(self.current.load(Ordering::Acquire))
    }

    fn resolve(
        &self,
        namespace: &Namespace,
        key: &LogicalKey,
        version: RouterVersion,
    ) -> Result<PhysicalShard, ResolutionError> {
        let tables = self.tables.read();
        let table = tables
            .get(&version)
            .ok_or(ResolutionError::UnknownRouterVersion { version })?;
        table.route_key(namespace.id, key.as_bytes())
    }
}

/// Compute the hash for routing a key.
///
/// This is the core routing function exposed for testing and debugging.
pub fn compute_routing_hash(namespace_id: u32, key: &[u8], hash_seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(hash_seed);
    hasher.write(&namespace_id.to_be_bytes());
    hasher.write(key);
    hasher.finish()
}
