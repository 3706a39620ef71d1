//! Replica connection seams.
//!
//! The read path never opens sockets itself. A [`ConnectionProvider`] opens
//! connections to `(shard, replica)` endpoints and reports how many replicas
//! a shard has; a [`Connection`] performs single-key reads and the repair
//! writes scheduled by multi-read reconciliation. Wire encoding lives behind
//! these traits.

use crate::control::routing::{PhysicalKey, PhysicalShard};
use crate::core::error::{ConnectionError, TransportError};
use crate::core::types::{ReplicaIndex, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// An established connection to one replica.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Read a key. `Ok(None)` is a miss.
    async fn read_value(&self, key: &PhysicalKey) -> Result<Option<Value>, TransportError>;

    /// Overwrite a key with `value`.
    async fn write_value(&self, key: &PhysicalKey, value: &Value) -> Result<(), TransportError>;
}

/// Opens connections to shard replicas.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Number of replicas currently serving `shard`.
    fn replica_count(&self, shard: PhysicalShard) -> usize;

    /// Open a new connection to one replica of `shard`.
    async fn connect(
        &self,
        shard: PhysicalShard,
        replica: ReplicaIndex,
    ) -> Result<Arc<dyn Connection>, ConnectionError>;
}
