//! Concurrent per-replica dispatch.
//!
//! For one sub-operation the dispatcher builds one [`ReplicaRead`] future per
//! replica of the shard's replica set and polls them together in a
//! `FuturesUnordered` on the caller's task. Reads are I/O bound, so this gives
//! the concurrency the fan-out needs without spawning. A connection or
//! transport failure is captured on that read's [`ReplicaAttempt`] and never
//! reaches its siblings.
//!
//! A dispatcher deadline bounds the wait. Reads still outstanding at the
//! deadline are dropped and recorded as timed out; reads dropped because
//! another replica already answered (first-success dispatch) are recorded as
//! abandoned. Dropping a read drops its pooled lease, so every connection is
//! released on every exit path.

use crate::control::routing::{PhysicalKey, PhysicalShard};
use crate::core::error::AttemptFailure;
use crate::core::types::{ReplicaIndex, Value};
use crate::net::pool::ConnectionPool;
use crate::read::operation::DispatchShape;
use crate::read::splitter::SubOperation;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one replica attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaAttempt {
    pub replica: ReplicaIndex,
    /// `Ok(None)` is a miss reported by the replica.
    pub outcome: Result<Option<Value>, AttemptFailure>,
    pub elapsed: Duration,
}

impl ReplicaAttempt {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    fn unfinished(replica: ReplicaIndex, failure: AttemptFailure, elapsed: Duration) -> Self {
        Self {
            replica,
            outcome: Err(failure),
            elapsed,
        }
    }
}

/// One read against one replica.
struct ReplicaRead {
    pool: ConnectionPool,
    shard: PhysicalShard,
    replica: ReplicaIndex,
    key: PhysicalKey,
}

impl ReplicaRead {
    async fn run(self) -> ReplicaAttempt {
        let started = Instant::now();
        let outcome = self.read().await;
        if let Err(ref err) = outcome {
            tracing::debug!(
                shard = %self.shard,
                replica = %self.replica,
                key = %self.key,
                error = %err,
                "replica attempt failed"
            );
        }
        ReplicaAttempt {
            replica: self.replica,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    async fn read(&self) -> Result<Option<Value>, AttemptFailure> {
        let mut conn = self.pool.acquire(self.shard, self.replica).await?;
        let value = conn.read_value(&self.key).await?;
        Ok(value)
    }
}

/// Fans one sub-operation out to its replica set.
#[derive(Clone)]
pub struct ReplicaDispatcher {
    pool: ConnectionPool,
    timeout: Duration,
}

impl ReplicaDispatcher {
    pub fn new(pool: ConnectionPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Replicas a sub-operation targets: its fan-out, clamped to the shard's
    /// replica set.
    pub fn replica_set(&self, sub: &SubOperation) -> Vec<ReplicaIndex> {
        let available = self.pool.replica_count(sub.shard);
        let count = sub.fan_out.min(available);
        (0..count as u32).map(ReplicaIndex).collect()
    }

    /// Dispatch to every replica and collect one attempt per replica.
    ///
    /// Returned attempts are in completion order, followed by timed-out or
    /// abandoned attempts in replica order.
    pub async fn dispatch(&self, sub: &SubOperation, shape: DispatchShape) -> Vec<ReplicaAttempt> {
        let replicas = self.replica_set(sub);
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut pending: FuturesUnordered<_> = replicas
            .iter()
            .map(|&replica| {
                ReplicaRead {
                    pool: self.pool.clone(),
                    shard: sub.shard,
                    replica,
                    key: sub.physical_key.clone(),
                }
                .run()
            })
            .collect();

        let mut attempts = Vec::with_capacity(replicas.len());
        let unfinished = loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(attempt)) => {
                    let answered = attempt.is_success();
                    attempts.push(attempt);
                    if answered && shape == DispatchShape::FirstSuccess {
                        break AttemptFailure::Abandoned;
                    }
                }
                Ok(None) => break AttemptFailure::Abandoned,
                Err(_) => {
                    break AttemptFailure::TimedOut {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                }
            }
        };
        // Cancels whatever is still running and releases its leases.
        drop(pending);

        if attempts.len() < replicas.len() {
            let done: HashSet<ReplicaIndex> = attempts.iter().map(|a| a.replica).collect();
            let elapsed = started.elapsed();
            for replica in replicas.into_iter().filter(|r| !done.contains(r)) {
                if let AttemptFailure::TimedOut { .. } = unfinished {
                    tracing::debug!(
                        shard = %sub.shard,
                        replica = %replica,
                        key = %sub.key,
                        "replica attempt timed out"
                    );
                }
                attempts.push(ReplicaAttempt::unfinished(
                    replica,
                    unfinished.clone(),
                    elapsed,
                ));
            }
        }
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::namespace::Namespace;
    use crate::control::routing::RouterVersion;
    use crate::core::types::LogicalKey;
    use crate::net::memory::{InMemoryCluster, ReplicaFault};
    use crate::net::pool::PoolConfig;
    use std::sync::Arc;

    fn sub_operation(fan_out: usize) -> SubOperation {
        let namespace = Arc::new(Namespace::new("ns", 1, fan_out as u32));
        let key = LogicalKey::from("k");
        SubOperation {
            index: 0,
            physical_key: PhysicalKey::build(&namespace, &key),
            key,
            namespace,
            shard: PhysicalShard::new(0),
            router_version: RouterVersion(1),
            fan_out,
        }
    }

    fn setup(replicas: usize, timeout_ms: u64) -> (Arc<InMemoryCluster>, ReplicaDispatcher) {
        let cluster = Arc::new(InMemoryCluster::new(replicas));
        let pool = ConnectionPool::new(cluster.clone(), PoolConfig::default());
        let dispatcher = ReplicaDispatcher::new(pool, Duration::from_millis(timeout_ms));
        (cluster, dispatcher)
    }

    fn by_replica(mut attempts: Vec<ReplicaAttempt>) -> Vec<ReplicaAttempt> {
        attempts.sort_by_key(|a| a.replica);
        attempts
    }

    #[tokio::test]
    async fn one_attempt_per_replica() {
        let (cluster, dispatcher) = setup(3, 200);
        let sub = sub_operation(3);
        cluster.put_all(sub.physical_key.clone(), Value::new("v"));

        let attempts = dispatcher.dispatch(&sub, DispatchShape::AllReplicas).await;
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(ReplicaAttempt::is_success));
    }

    #[tokio::test]
    async fn replica_set_clamped_to_available() {
        let (cluster, dispatcher) = setup(3, 200);
        cluster.limit_shard_replicas(PhysicalShard::new(0), 2);

        let attempts = dispatcher
            .dispatch(&sub_operation(3), DispatchShape::AllReplicas)
            .await;
        assert_eq!(attempts.len(), 2);
    }

    #[tokio::test]
    async fn failures_are_captured_per_attempt() {
        let (cluster, dispatcher) = setup(3, 200);
        cluster.set_fault(ReplicaIndex(0), ReplicaFault::RefuseConnect);
        cluster.set_fault(ReplicaIndex(1), ReplicaFault::FailReads);

        let attempts = by_replica(
            dispatcher
                .dispatch(&sub_operation(3), DispatchShape::AllReplicas)
                .await,
        );
        assert!(matches!(
            attempts[0].outcome,
            Err(AttemptFailure::Connection(_))
        ));
        assert!(matches!(attempts[1].outcome, Err(AttemptFailure::Transport(_))));
        assert_eq!(attempts[2].outcome, Ok(None));
    }

    #[tokio::test]
    async fn hung_replica_times_out_and_releases_lease() {
        let (cluster, dispatcher) = setup(2, 30);
        cluster.set_fault(ReplicaIndex(1), ReplicaFault::Hang);

        let attempts = by_replica(
            dispatcher
                .dispatch(&sub_operation(2), DispatchShape::AllReplicas)
                .await,
        );
        assert!(attempts[0].is_success());
        assert_eq!(
            attempts[1].outcome,
            Err(AttemptFailure::TimedOut { timeout_ms: 30 })
        );
        assert_eq!(dispatcher.pool.stats().outstanding, 0);
        assert_eq!(cluster.inflight_reads(), 0);
    }

    #[tokio::test]
    async fn first_success_abandons_slow_replicas() {
        let (cluster, dispatcher) = setup(3, 1_000);
        cluster.set_fault(ReplicaIndex(1), ReplicaFault::Hang);
        cluster.set_fault(ReplicaIndex(2), ReplicaFault::Hang);

        let started = std::time::Instant::now();
        let attempts = by_replica(
            dispatcher
                .dispatch(&sub_operation(3), DispatchShape::FirstSuccess)
                .await,
        );
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(attempts[0].is_success());
        assert_eq!(attempts[1].outcome, Err(AttemptFailure::Abandoned));
        assert_eq!(attempts[2].outcome, Err(AttemptFailure::Abandoned));
        assert_eq!(dispatcher.pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn first_success_waits_past_failures() {
        let (cluster, dispatcher) = setup(2, 500);
        cluster.set_fault(ReplicaIndex(0), ReplicaFault::FailReads);
        cluster.set_fault(
            ReplicaIndex(1),
            ReplicaFault::Delay(Duration::from_millis(20)),
        );

        let attempts = dispatcher
            .dispatch(&sub_operation(2), DispatchShape::FirstSuccess)
            .await;
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().any(ReplicaAttempt::is_success));
    }
}
