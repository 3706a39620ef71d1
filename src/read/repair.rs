//! Fire-and-forget read repair.
//!
//! When a multi-read finds divergent replicas, the canonical value is
//! written back to every stale replica in a detached task. Repair never
//! delays or fails the read that triggered it: write failures are logged
//! and counted, nothing more.

use crate::core::types::ReplicaIndex;
use crate::net::pool::ConnectionPool;
use crate::read::reconciler::RepairPlan;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Repair settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairOptions {
    pub enabled: bool,
    /// Bound on each repair write.
    pub timeout: Duration,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Repair counters.
#[derive(Debug, Default)]
pub struct RepairStats {
    scheduled: AtomicU64,
    skipped: AtomicU64,
    writes_succeeded: AtomicU64,
    writes_failed: AtomicU64,
}

impl RepairStats {
    pub fn snapshot(&self) -> RepairStatsSnapshot {
        RepairStatsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`RepairStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairStatsSnapshot {
    /// Repair plans handed to a background task.
    pub scheduled: u64,
    /// Repair plans dropped because repair is disabled or no runtime is running.
    pub skipped: u64,
    pub writes_succeeded: u64,
    pub writes_failed: u64,
}

/// Schedules repair writes on the shared pool.
#[derive(Clone)]
pub struct ReadRepairer {
    pool: ConnectionPool,
    options: RepairOptions,
    stats: Arc<RepairStats>,
}

impl ReadRepairer {
    pub fn new(pool: ConnectionPool, options: RepairOptions) -> Self {
        Self {
            pool,
            options,
            stats: Arc::new(RepairStats::default()),
        }
    }

    pub fn stats(&self) -> RepairStatsSnapshot {
        self.stats.snapshot()
    }

    /// Start repairing the plan's targets in the background.
    ///
    /// Returns the task handle, or `None` when the plan was skipped. Callers
    /// on the read path drop the handle.
    pub fn schedule(&self, plan: RepairPlan) -> Option<JoinHandle<()>> {
        if !self.options.enabled || plan.targets.is_empty() {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %plan.key, "no runtime available; read repair skipped");
            return None;
        };

        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            key = %plan.key,
            shard = %plan.shard,
            targets = ?plan.targets,
            "scheduling read repair"
        );
        let repairer = self.clone();
        Some(runtime.spawn(async move { repairer.run(plan).await }))
    }

    async fn run(self, plan: RepairPlan) {
        let writes = plan
            .targets
            .iter()
            .map(|&replica| self.write_one(&plan, replica));
        join_all(writes).await;
    }

    async fn write_one(&self, plan: &RepairPlan, replica: ReplicaIndex) {
        let write = async {
            let mut conn = self.pool.acquire(plan.shard, replica).await?;
            conn.write_value(&plan.physical_key, &plan.value).await?;
            Ok::<(), anyhow::Error>(())
        };

        let failure = match tokio::time::timeout(self.options.timeout, write).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!(
                "timed out after {}ms",
                self.options.timeout.as_millis()
            )),
        };

        match failure {
            None => {
                self.stats.writes_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Some(error) => {
                self.stats.writes_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    key = %plan.key,
                    shard = %plan.shard,
                    replica = %replica,
                    error = %error,
                    "read repair write failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::namespace::Namespace;
    use crate::control::routing::{PhysicalKey, PhysicalShard};
    use crate::core::types::{LogicalKey, Value};
    use crate::net::memory::{InMemoryCluster, ReplicaFault};
    use crate::net::pool::PoolConfig;

    fn plan(targets: &[u32]) -> RepairPlan {
        let namespace = Namespace::new("ns", 1, 3);
        let key = LogicalKey::from("k");
        RepairPlan {
            physical_key: PhysicalKey::build(&namespace, &key),
            key,
            shard: PhysicalShard::new(0),
            value: Value::new("fresh"),
            targets: targets.iter().map(|&r| ReplicaIndex(r)).collect(),
        }
    }

    fn repairer(options: RepairOptions) -> (Arc<InMemoryCluster>, ReadRepairer) {
        let cluster = Arc::new(InMemoryCluster::new(3));
        let pool = ConnectionPool::new(cluster.clone(), PoolConfig::default());
        (cluster, ReadRepairer::new(pool, options))
    }

    #[tokio::test]
    async fn writes_canonical_value_to_targets() {
        let (cluster, repairer) = repairer(RepairOptions::default());
        let plan = plan(&[1, 2]);
        let key = plan.physical_key.clone();

        repairer.schedule(plan).unwrap().await.unwrap();

        assert!(cluster.writes(ReplicaIndex(0)).is_empty());
        assert_eq!(cluster.get(ReplicaIndex(1), &key), Some(Value::new("fresh")));
        assert_eq!(cluster.get(ReplicaIndex(2), &key), Some(Value::new("fresh")));
        assert_eq!(repairer.stats().writes_succeeded, 2);
    }

    #[tokio::test]
    async fn failed_write_is_counted_not_raised() {
        let (cluster, repairer) = repairer(RepairOptions::default());
        cluster.set_fault(ReplicaIndex(1), ReplicaFault::RefuseConnect);

        repairer.schedule(plan(&[1, 2])).unwrap().await.unwrap();

        let stats = repairer.stats();
        assert_eq!(stats.writes_succeeded, 1);
        assert_eq!(stats.writes_failed, 1);
    }

    #[tokio::test]
    async fn disabled_repair_skips() {
        let (cluster, repairer) = repairer(RepairOptions {
            enabled: false,
            ..RepairOptions::default()
        });

        assert!(repairer.schedule(plan(&[1])).is_none());
        assert!(cluster.writes(ReplicaIndex(1)).is_empty());
        assert_eq!(repairer.stats().skipped, 1);
    }

    #[test]
    fn no_runtime_skips() {
        let (_cluster, repairer) = repairer(RepairOptions::default());
        assert!(repairer.schedule(plan(&[1])).is_none());
        assert_eq!(repairer.stats().skipped, 1);
    }
}
