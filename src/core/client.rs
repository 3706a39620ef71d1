//! Read client facade.
//!
//! [`ReadClient`] owns one connection pool, one resolver and one executor.
//! Callers address namespaces by name; the namespace is looked up once per
//! call and handed to the executor fully resolved.

use crate::control::namespace::{Namespace, NamespaceRegistry};
use crate::control::routing::{HashKeyResolver, KeyResolver, RouterVersion};
use crate::core::config::ClientConfig;
use crate::core::error::ReadResult;
use crate::core::types::{LogicalKey, Value};
use crate::net::connection::ConnectionProvider;
use crate::net::pool::{ConnectionPool, PoolStatsSnapshot};
use crate::read::executor::{CancelSignal, KeyResult, ReadExecutor, ReadStatsSnapshot};
use crate::read::operation::OperationKind;
use crate::read::repair::RepairStatsSnapshot;
use anyhow::Result;
use std::sync::Arc;

/// Client for replicated reads.
pub struct ReadClient {
    namespaces: NamespaceRegistry,
    resolver: Arc<dyn KeyResolver>,
    pool: ConnectionPool,
    executor: ReadExecutor,
}

impl ReadClient {
    /// Build a client from validated configuration and injected routing and
    /// connectivity.
    pub fn new(
        config: &ClientConfig,
        resolver: Arc<dyn KeyResolver>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = ConnectionPool::new(provider, config.pool_config());
        let executor = ReadExecutor::new(
            resolver.clone(),
            pool.clone(),
            config.read_options(),
            config.repair_options(),
        );
        let namespaces = NamespaceRegistry::from_config(&config.namespaces);

        tracing::info!(
            namespaces = namespaces.len(),
            router_version = %resolver.current_version(),
            max_inflight_keys = config.read.max_inflight_keys,
            dispatch_timeout_ms = config.read.dispatch_timeout_ms,
            "read client ready"
        );

        Ok(Self {
            namespaces,
            resolver,
            pool,
            executor,
        })
    }

    /// Build a client that routes with the configured hash routing table.
    pub fn with_hash_routing(
        config: &ClientConfig,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Result<Self> {
        let resolver = Arc::new(HashKeyResolver::new(config.routing_table()));
        Self::new(config, resolver, provider)
    }

    pub fn namespace(&self, name: &str) -> ReadResult<Arc<Namespace>> {
        self.namespaces.get(name)
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn router_version(&self) -> RouterVersion {
        self.resolver.current_version()
    }

    /// Read one key. `Ok(None)` is a miss.
    pub async fn get(&self, namespace: &str, key: impl Into<LogicalKey>) -> ReadResult<Option<Value>> {
        let namespace = self.namespace(namespace)?;
        let mut results = self
            .executor
            .execute(OperationKind::Get, &namespace, &[key.into()], None)
            .await;
        results.pop().unwrap_or(Ok(None))
    }

    /// Read many keys. One result per key, in input order.
    pub async fn get_many(&self, namespace: &str, keys: &[LogicalKey]) -> ReadResult<Vec<KeyResult>> {
        let namespace = self.namespace(namespace)?;
        Ok(self
            .executor
            .execute(OperationKind::Gets, &namespace, keys, None)
            .await)
    }

    /// Read many keys, stopping early when `cancel` fires.
    ///
    /// Keys unfinished at cancellation report `ReadError::Cancelled`.
    pub async fn get_many_with_cancel(
        &self,
        namespace: &str,
        keys: &[LogicalKey],
        cancel: CancelSignal,
    ) -> ReadResult<Vec<KeyResult>> {
        let namespace = self.namespace(namespace)?;
        Ok(self
            .executor
            .execute(OperationKind::Gets, &namespace, keys, Some(cancel))
            .await)
    }

    pub fn stats(&self) -> ReadStatsSnapshot {
        self.executor.stats()
    }

    pub fn repair_stats(&self) -> RepairStatsSnapshot {
        self.executor.repair_stats()
    }

    pub fn pool_stats(&self) -> PoolStatsSnapshot {
        self.pool.stats()
    }

    /// Close the pool. Reads issued afterwards fail per key.
    pub fn shutdown(&self) {
        tracing::info!("read client shutting down");
        self.pool.close();
    }
}
