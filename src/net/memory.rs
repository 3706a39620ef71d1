//! In-process replica backend.
//!
//! [`InMemoryCluster`] serves every shard from a fixed set of in-memory
//! nodes: replica `r` of any shard is node `r`. Each node can be given a
//! fault (refused connections, failing reads, slow or hung reads), and the
//! cluster records repair writes and read concurrency so callers can observe
//! the read path's behaviour without a network.

use crate::control::routing::{PhysicalKey, PhysicalShard};
use crate::core::error::{ConnectionError, TransportError};
use crate::core::types::{ReplicaIndex, Value};
use crate::net::connection::{Connection, ConnectionProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Injected behaviour for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaFault {
    /// Healthy.
    #[default]
    None,
    /// Connection attempts fail.
    RefuseConnect,
    /// Connections open but every read and write fails.
    FailReads,
    /// Reads answer after the given delay.
    Delay(Duration),
    /// Reads never answer.
    Hang,
}

#[derive(Default)]
struct Node {
    data: Mutex<HashMap<PhysicalKey, Value>>,
    fault: Mutex<ReplicaFault>,
    writes: Mutex<Vec<(PhysicalKey, Value)>>,
    reads: AtomicU64,
}

#[derive(Default)]
struct Gauges {
    open_connections: AtomicUsize,
    inflight_reads: AtomicUsize,
    max_inflight_reads: AtomicUsize,
}

/// In-memory [`ConnectionProvider`].
pub struct InMemoryCluster {
    nodes: Vec<Arc<Node>>,
    shard_replicas: Mutex<HashMap<PhysicalShard, usize>>,
    gauges: Arc<Gauges>,
}

impl InMemoryCluster {
    /// Create a cluster where every shard has `replicas` replicas.
    pub fn new(replicas: usize) -> Self {
        Self {
            nodes: (0..replicas).map(|_| Arc::new(Node::default())).collect(),
            shard_replicas: Mutex::new(HashMap::new()),
            gauges: Arc::new(Gauges::default()),
        }
    }

    /// Shrink one shard's replica set below the cluster size.
    pub fn limit_shard_replicas(&self, shard: PhysicalShard, replicas: usize) {
        self.shard_replicas
            .lock()
            .insert(shard, replicas.min(self.nodes.len()));
    }

    /// Store a value on one node.
    pub fn put(&self, replica: ReplicaIndex, key: PhysicalKey, value: Value) {
        if let Some(node) = self.node(replica) {
            node.data.lock().insert(key, value);
        }
    }

    /// Store the same value on every node.
    pub fn put_all(&self, key: PhysicalKey, value: Value) {
        for node in &self.nodes {
            node.data.lock().insert(key.clone(), value.clone());
        }
    }

    /// Value held by one node.
    pub fn get(&self, replica: ReplicaIndex, key: &PhysicalKey) -> Option<Value> {
        self.node(replica)
            .and_then(|node| node.data.lock().get(key).cloned())
    }

    pub fn set_fault(&self, replica: ReplicaIndex, fault: ReplicaFault) {
        if let Some(node) = self.node(replica) {
            *node.fault.lock() = fault;
        }
    }

    /// Writes received by one node, in arrival order.
    pub fn writes(&self, replica: ReplicaIndex) -> Vec<(PhysicalKey, Value)> {
        self.node(replica)
            .map(|node| node.writes.lock().clone())
            .unwrap_or_default()
    }

    /// Reads served (or attempted) by one node.
    pub fn reads(&self, replica: ReplicaIndex) -> u64 {
        self.node(replica)
            .map_or(0, |node| node.reads.load(Ordering::Acquire))
    }

    /// Connections currently open, idle ones included.
    pub fn open_connections(&self) -> usize {
        self.gauges.open_connections.load(Ordering::Acquire)
    }

    /// Reads currently executing across all nodes.
    pub fn inflight_reads(&self) -> usize {
        self.gauges.inflight_reads.load(Ordering::Acquire)
    }

    /// Highest number of concurrently executing reads observed.
    pub fn max_inflight_reads(&self) -> usize {
        self.gauges.max_inflight_reads.load(Ordering::Acquire)
    }

    fn node(&self, replica: ReplicaIndex) -> Option<&Arc<Node>> {
        self.nodes.get(replica.0 as usize)
    }
}

#[async_trait]
impl ConnectionProvider for InMemoryCluster {
    fn replica_count(&self, shard: PhysicalShard) -> usize {
        self.shard_replicas
            .lock()
            .get(&shard)
            .copied()
            .unwrap_or(self.nodes.len())
    }

    async fn connect(
        &self,
        shard: PhysicalShard,
        replica: ReplicaIndex,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        if replica.0 as usize >= self.replica_count(shard) {
            return Err(ConnectionError::unreachable(shard, replica, "no such replica"));
        }
        let node = self
            .node(replica)
            .cloned()
            .ok_or_else(|| ConnectionError::unreachable(shard, replica, "no such node"))?;
        if *node.fault.lock() == ReplicaFault::RefuseConnect {
            return Err(ConnectionError::unreachable(shard, replica, "connection refused"));
        }
        self.gauges.open_connections.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(MemoryConnection {
            node,
            gauges: self.gauges.clone(),
        }))
    }
}

struct MemoryConnection {
    node: Arc<Node>,
    gauges: Arc<Gauges>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.gauges.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Counts a read as in flight until dropped, including on cancellation.
struct InflightRead<'a> {
    gauges: &'a Gauges,
}

impl<'a> InflightRead<'a> {
    fn enter(gauges: &'a Gauges) -> Self {
        let now = gauges.inflight_reads.fetch_add(1, Ordering::AcqRel) + 1;
        gauges.max_inflight_reads.fetch_max(now, Ordering::AcqRel);
        Self { gauges }
    }
}

impl Drop for InflightRead<'_> {
    fn drop(&mut self) {
        self.gauges.inflight_reads.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn read_value(&self, key: &PhysicalKey) -> Result<Option<Value>, TransportError> {
        self.node.reads.fetch_add(1, Ordering::AcqRel);
        let _inflight = InflightRead::enter(&self.gauges);
        let fault = *self.node.fault.lock();
        match fault {
            ReplicaFault::FailReads => return Err(TransportError::new("injected read failure")),
            ReplicaFault::Delay(delay) => tokio::time::sleep(delay).await,
            ReplicaFault::Hang => std::future::pending::<()>().await,
            ReplicaFault::None | ReplicaFault::RefuseConnect => {}
        }
        Ok(self.node.data.lock().get(key).cloned())
    }

    async fn write_value(&self, key: &PhysicalKey, value: &Value) -> Result<(), TransportError> {
        if *self.node.fault.lock() == ReplicaFault::FailReads {
            return Err(TransportError::new("injected write failure"));
        }
        self.node.writes.lock().push((key.clone(), value.clone()));
        self.node.data.lock().insert(key.clone(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::namespace::Namespace;

    fn key(k: &str) -> PhysicalKey {
        PhysicalKey::build(&Namespace::new("ns", 1, 3), &k.into())
    }

    #[tokio::test]
    async fn nodes_hold_independent_values() {
        let cluster = InMemoryCluster::new(2);
        cluster.put(ReplicaIndex(0), key("a"), Value::new("x"));

        let shard = PhysicalShard::new(5);
        let c0 = cluster.connect(shard, ReplicaIndex(0)).await.unwrap();
        let c1 = cluster.connect(shard, ReplicaIndex(1)).await.unwrap();
        assert_eq!(c0.read_value(&key("a")).await.unwrap(), Some(Value::new("x")));
        assert_eq!(c1.read_value(&key("a")).await.unwrap(), None);
        assert_eq!(cluster.open_connections(), 2);

        drop(c0);
        assert_eq!(cluster.open_connections(), 1);
    }

    #[tokio::test]
    async fn limited_shard_refuses_extra_replicas() {
        let cluster = InMemoryCluster::new(3);
        let shard = PhysicalShard::new(1);
        cluster.limit_shard_replicas(shard, 2);

        assert_eq!(cluster.replica_count(shard), 2);
        assert_eq!(cluster.replica_count(PhysicalShard::new(0)), 3);
        assert!(cluster.connect(shard, ReplicaIndex(2)).await.is_err());
    }

    #[tokio::test]
    async fn writes_are_recorded() {
        let cluster = InMemoryCluster::new(1);
        let conn = cluster
            .connect(PhysicalShard::new(0), ReplicaIndex(0))
            .await
            .unwrap();
        conn.write_value(&key("a"), &Value::new("v")).await.unwrap();

        assert_eq!(cluster.writes(ReplicaIndex(0)).len(), 1);
        assert_eq!(cluster.get(ReplicaIndex(0), &key("a")), Some(Value::new("v")));
    }
}
