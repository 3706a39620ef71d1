//! Key, value and replica identifiers shared by the read path.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Caller-supplied key, opaque to the read path.
///
/// Logical keys are never rewritten; the namespace-qualified form sent to
/// replicas is a [`PhysicalKey`](crate::control::routing::PhysicalKey).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalKey(Bytes);

impl LogicalKey {
    /// Create a logical key from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for LogicalKey {
    fn from(key: &str) -> Self {
        Self(Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl From<String> for LogicalKey {
    fn from(key: String) -> Self {
        Self(Bytes::from(key))
    }
}

impl From<Vec<u8>> for LogicalKey {
    fn from(key: Vec<u8>) -> Self {
        Self(Bytes::from(key))
    }
}

impl From<&[u8]> for LogicalKey {
    fn from(key: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(key))
    }
}

impl std::fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A value as stored on one replica.
///
/// `version` is the replica-reported write stamp when the backend tracks one.
/// Two values are equal only if both payload and stamp match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value {
    /// Payload bytes.
    pub data: Bytes,
    /// Write stamp, if the replica reports one.
    pub version: Option<u64>,
}

impl Value {
    /// Create an unversioned value.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            version: None,
        }
    }

    /// Create a value carrying a write stamp.
    pub fn versioned(data: impl Into<Bytes>, version: u64) -> Self {
        Self {
            data: data.into(),
            version: Some(version),
        }
    }
}

/// Position of a replica within a shard's replica set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ReplicaIndex(pub u32);

impl std::fmt::Display for ReplicaIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}
