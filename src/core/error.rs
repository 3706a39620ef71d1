//! Error types for the replicated read path.
//!
//! Failures are contained at the narrowest scope that can absorb them:
//! a replica failure is recorded on its attempt, a key failure occupies that
//! key's slot in the batch response, and nothing fails a whole batch.

use crate::control::routing::{PhysicalShard, RouterVersion};
use crate::core::types::{LogicalKey, ReplicaIndex};
use thiserror::Error;

/// A key could not be mapped to a physical shard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// The requested router version has no routing table.
    #[error("router version {version} is unknown to the resolver")]
    UnknownRouterVersion { version: RouterVersion },

    /// Empty keys have no routing hash.
    #[error("empty key cannot be routed")]
    EmptyKey,

    /// The routing table for this version has no shards.
    #[error("routing table {version} has no shards")]
    NoShards { version: RouterVersion },
}

/// Acquiring a connection to one replica failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The replica refused or could not be reached.
    #[error("{replica} of shard {shard} unreachable: {reason}")]
    Unreachable {
        shard: PhysicalShard,
        replica: ReplicaIndex,
        reason: String,
    },

    /// The pool has been closed.
    #[error("connection pool closed")]
    PoolClosed,
}

impl ConnectionError {
    pub fn unreachable(shard: PhysicalShard, replica: ReplicaIndex, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            shard,
            replica,
            reason: reason.into(),
        }
    }
}

/// A request on an established connection failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport failure: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a single replica attempt produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Still outstanding when the dispatcher deadline passed.
    #[error("no answer within {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    /// Dropped because another replica already answered.
    #[error("abandoned after another replica answered")]
    Abandoned,
}

impl AttemptFailure {
    /// Timeouts and abandonment carry no information about replica health.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Abandoned)
    }
}

/// Terminal failure for one key of a read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// No replica of the key's shard produced an answer.
    #[error(
        "all {attempted} replicas of shard {shard} unavailable{}",
        describe_last_error(.last_error)
    )]
    AllReplicasUnavailable {
        shard: PhysicalShard,
        attempted: usize,
        last_error: Option<AttemptFailure>,
    },

    /// The caller cancelled the request before this key finished.
    #[error("read cancelled")]
    Cancelled,

    /// The overall request deadline passed before this key finished.
    #[error("request deadline of {timeout_ms}ms exceeded")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("unknown namespace: {name}")]
    UnknownNamespace { name: String },
}

fn describe_last_error(last_error: &Option<AttemptFailure>) -> String {
    match last_error {
        Some(err) => format!(" (last error: {err})"),
        None => " (all attempts timed out)".to_string(),
    }
}

impl ReadError {
    /// Check if retrying the same key later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::AllReplicasUnavailable { .. } | Self::DeadlineExceeded { .. }
        )
    }
}

/// Result type using ReadError.
pub type ReadResult<T> = Result<T, ReadError>;

/// Replicas returned different values for one key.
///
/// Informational only: the read still succeeds with the canonical value and
/// the stale replicas are scheduled for repair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "replicas of shard {shard} diverged on key {key}: {distinct_values} distinct values, \
     canonical from {canonical_replica}, stale {stale_replicas:?}"
)]
pub struct ReconciliationConflict {
    pub key: LogicalKey,
    pub shard: PhysicalShard,
    pub canonical_replica: ReplicaIndex,
    pub stale_replicas: Vec<ReplicaIndex>,
    pub distinct_values: usize,
}
