//! Shared connection pool.
//!
//! Every replica attempt and every repair write borrows a connection through
//! a [`PooledConnection`] lease. The lease is released when dropped, so a
//! connection is returned on every exit path: success, error, dispatcher
//! timeout, or cancellation of the enclosing request.
//!
//! Open connections per endpoint are bounded by a semaphore; idle connections
//! are kept for reuse up to `max_idle_per_replica`. A lease whose request
//! failed is marked broken and its connection is discarded.

use crate::control::routing::{PhysicalKey, PhysicalShard};
use crate::core::error::{ConnectionError, TransportError};
use crate::core::types::{ReplicaIndex, Value};
use crate::net::connection::{Connection, ConnectionProvider};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum open connections per replica endpoint.
    pub max_connections_per_replica: usize,
    /// Maximum idle connections retained per replica endpoint.
    pub max_idle_per_replica: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_replica: 8,
            max_idle_per_replica: 4,
        }
    }
}

type Endpoint = (PhysicalShard, ReplicaIndex);

struct EndpointSlot {
    limit: Arc<Semaphore>,
    idle: Vec<Arc<dyn Connection>>,
}

/// Pool counters.
#[derive(Debug, Default)]
pub struct PoolStats {
    acquired: AtomicU64,
    released: AtomicU64,
    connects: AtomicU64,
    reused: AtomicU64,
    connect_failures: AtomicU64,
    discarded: AtomicU64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        let acquired = self.acquired.load(Ordering::Acquire);
        let released = self.released.load(Ordering::Acquire);
        PoolStatsSnapshot {
            acquired,
            released,
            outstanding: acquired.saturating_sub(released),
            connects: self.connects.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    /// Leases handed out.
    pub acquired: u64,
    /// Leases returned.
    pub released: u64,
    /// Leases currently held.
    pub outstanding: u64,
    /// New connections opened.
    pub connects: u64,
    /// Leases served from the idle list.
    pub reused: u64,
    /// Failed connection attempts.
    pub connect_failures: u64,
    /// Connections dropped instead of returned to the idle list.
    pub discarded: u64,
}

struct PoolInner {
    provider: Arc<dyn ConnectionProvider>,
    config: PoolConfig,
    endpoints: Mutex<HashMap<Endpoint, EndpointSlot>>,
    stats: PoolStats,
    closed: AtomicBool,
}

impl PoolInner {
    fn give_back(&self, endpoint: Endpoint, conn: Arc<dyn Connection>, broken: bool) {
        self.stats.released.fetch_add(1, Ordering::AcqRel);
        if broken || self.closed.load(Ordering::Acquire) {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut endpoints = self.endpoints.lock();
        match endpoints.get_mut(&endpoint) {
            Some(slot) if slot.idle.len() < self.config.max_idle_per_replica => {
                slot.idle.push(conn);
            }
            _ => {
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Connection pool shared by all reads and repairs of one client.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool over a connection provider.
    ///
    /// `max_connections_per_replica` is clamped to what a tokio semaphore
    /// can hold.
    pub fn new(provider: Arc<dyn ConnectionProvider>, mut config: PoolConfig) -> Self {
        config.max_connections_per_replica = config
            .max_connections_per_replica
            .clamp(1, Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(PoolInner {
                provider,
                config,
                endpoints: Mutex::new(HashMap::new()),
                stats: PoolStats::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of replicas serving `shard`.
    pub fn replica_count(&self, shard: PhysicalShard) -> usize {
        self.inner.provider.replica_count(shard)
    }

    /// Lease a connection to one replica.
    ///
    /// Waits while the endpoint is at `max_connections_per_replica`. If the
    /// returned future is dropped before completing, nothing is leased.
    pub async fn acquire(
        &self,
        shard: PhysicalShard,
        replica: ReplicaIndex,
    ) -> Result<PooledConnection, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::PoolClosed);
        }
        let endpoint = (shard, replica);
        let limit = {
            let mut endpoints = self.inner.endpoints.lock();
            endpoints
                .entry(endpoint)
                .or_insert_with(|| EndpointSlot {
                    limit: Arc::new(Semaphore::new(self.inner.config.max_connections_per_replica)),
                    idle: Vec::new(),
                })
                .limit
                .clone()
        };
        let permit = limit
            .acquire_owned()
            .await
            .map_err(|_| ConnectionError::PoolClosed)?;

        let idle = {
            let mut endpoints = self.inner.endpoints.lock();
            endpoints.get_mut(&endpoint).and_then(|slot| slot.idle.pop())
        };
        let conn = match idle {
            Some(conn) => {
                self.inner.stats.reused.fetch_add(1, Ordering::Relaxed);
                conn
            }
            None => match self.inner.provider.connect(shard, replica).await {
                Ok(conn) => {
                    self.inner.stats.connects.fetch_add(1, Ordering::Relaxed);
                    conn
                }
                Err(err) => {
                    self.inner
                        .stats
                        .connect_failures
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            },
        };

        self.inner.stats.acquired.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            conn: Some(conn),
            endpoint,
            broken: false,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Close the pool: pending and future acquisitions fail, idle
    /// connections are dropped, held leases are discarded on release.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut endpoints = self.inner.endpoints.lock();
        for slot in endpoints.values_mut() {
            slot.limit.close();
            slot.idle.clear();
        }
        tracing::debug!(endpoints = endpoints.len(), "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Idle connections currently held for an endpoint.
    pub fn idle_count(&self, shard: PhysicalShard, replica: ReplicaIndex) -> usize {
        self.inner
            .endpoints
            .lock()
            .get(&(shard, replica))
            .map_or(0, |slot| slot.idle.len())
    }
}

/// A leased connection, returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<Arc<dyn Connection>>,
    endpoint: Endpoint,
    broken: bool,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn read_value(&mut self, key: &PhysicalKey) -> Result<Option<Value>, TransportError> {
        let conn = self.live()?;
        let result = conn.read_value(key).await;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    pub async fn write_value(&mut self, key: &PhysicalKey, value: &Value) -> Result<(), TransportError> {
        let conn = self.live()?;
        let result = conn.write_value(key, value).await;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    fn live(&self) -> Result<Arc<dyn Connection>, TransportError> {
        self.conn
            .clone()
            .ok_or_else(|| TransportError::new("connection already released"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(self.endpoint, conn, self.broken);
        }
    }
}
