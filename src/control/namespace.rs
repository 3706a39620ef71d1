//! Namespace descriptors.
//!
//! A namespace fixes the replication factor (`copy_count`) and the read mode
//! for every key it contains. Namespaces arrive fully resolved from
//! configuration; the read path never mutates them.

use crate::core::config::NamespaceConfig;
use crate::core::error::{ReadError, ReadResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How replicas of a namespace are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadMode {
    /// Any one replica's answer is authoritative.
    Read,
    /// All replicas are read and compared; divergence is repaired.
    MultiRead,
}

/// A resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace name used by callers.
    pub name: String,
    /// Numeric id used in routing and physical keys.
    pub id: u32,
    /// Replication factor; at least 1.
    pub copy_count: u32,
    /// Read every replica and reconcile.
    pub multi_read: bool,
}

impl Namespace {
    /// Create a single-read namespace.
    pub fn new(name: impl Into<String>, id: u32, copy_count: u32) -> Self {
        Self {
            name: name.into(),
            id,
            copy_count,
            multi_read: false,
        }
    }

    pub fn with_multi_read(mut self, multi_read: bool) -> Self {
        self.multi_read = multi_read;
        self
    }

    /// Read mode selected by the `multi_read` flag.
    pub fn read_mode(&self) -> ReadMode {
        if self.multi_read {
            ReadMode::MultiRead
        } else {
            ReadMode::Read
        }
    }
}

impl From<&NamespaceConfig> for Namespace {
    fn from(config: &NamespaceConfig) -> Self {
        Self {
            name: config.name.clone(),
            id: config.id,
            copy_count: config.copy_count,
            multi_read: config.multi_read,
        }
    }
}

/// Namespaces known to a client, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    by_name: HashMap<String, Arc<Namespace>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured namespaces.
    pub fn from_config(namespaces: &[NamespaceConfig]) -> Self {
        let mut registry = Self::new();
        for config in namespaces {
            registry.insert(Namespace::from(config));
        }
        registry
    }

    /// Register or replace a namespace.
    pub fn insert(&mut self, namespace: Namespace) {
        self.by_name
            .insert(namespace.name.clone(), Arc::new(namespace));
    }

    /// Look up a namespace by name.
    pub fn get(&self, name: &str) -> ReadResult<Arc<Namespace>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ReadError::UnknownNamespace {
                name: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registered namespace names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_mode_follows_flag() {
        let ns = Namespace::new("sessions", 1, 2);
        assert_eq!(ns.read_mode(), ReadMode::Read);
        assert_eq!(ns.with_multi_read(true).read_mode(), ReadMode::MultiRead);
    }

    #[test]
    fn registry_lookup() {
        let mut registry = NamespaceRegistry::new();
        registry.insert(Namespace::new("b", 2, 1));
        registry.insert(Namespace::new("a", 1, 3).with_multi_read(true));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("a").unwrap().multi_read);

        match registry.get("missing") {
            Err(ReadError::UnknownNamespace { name }) => assert_eq!(name, "missing"),
            other => panic!("expected UnknownNamespace, got {other:?}"),
        }
    }
}
