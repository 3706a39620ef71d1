//! Read operation executor.
//!
//! Drives one request through its phases:
//!
//! ```text
//! Start -> Splitting -> Dispatching -> Reconciling -> Aggregating -> Done
//! ```
//!
//! The router version is captured once at Splitting and used for every key
//! of the request. Sub-operations then run concurrently, bounded by a
//! semaphore shared by every request of the executor. Each key completes
//! independently; the aggregated result always has one slot per
//! sub-operation, in input order.
//!
//! Caller cancellation and the optional request deadline stop the request
//! early. Unfinished sub-operations are dropped, which releases their
//! connection leases, and their slots report `Cancelled` or
//! `DeadlineExceeded`.

use crate::control::namespace::{Namespace, ReadMode};
use crate::control::routing::KeyResolver;
use crate::core::error::{ReadError, ReadResult};
use crate::core::types::{LogicalKey, Value};
use crate::net::pool::{ConnectionPool, PoolStatsSnapshot};
use crate::read::dispatcher::ReplicaDispatcher;
use crate::read::operation::{MergeStrategy, OperationKind, OperationProfile};
use crate::read::reconciler::{self, ConflictPolicy};
use crate::read::repair::{ReadRepairer, RepairOptions, RepairStatsSnapshot};
use crate::read::splitter::{self, SubOperation};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

/// Result for one key.
pub type KeyResult = ReadResult<Option<Value>>;

/// Executor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Per-key bound on waiting for replica answers.
    pub dispatch_timeout: Duration,
    /// Bound on a whole request.
    pub request_timeout: Option<Duration>,
    /// Sub-operations dispatched concurrently across all requests.
    pub max_inflight_keys: usize,
    pub conflict_policy: ConflictPolicy,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_millis(500),
            request_timeout: None,
            max_inflight_keys: 64,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

/// Lifecycle phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Start,
    Splitting,
    Dispatching,
    Reconciling,
    Aggregating,
    Done,
}

impl OperationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Splitting => "splitting",
            Self::Dispatching => "dispatching",
            Self::Reconciling => "reconciling",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
        }
    }
}

/// Caller side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancel every request holding the paired signal.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Request side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Never resolves if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

/// Read counters.
#[derive(Debug, Default)]
pub struct ReadStats {
    requests: AtomicU64,
    keys_found: AtomicU64,
    keys_missing: AtomicU64,
    keys_failed: AtomicU64,
    keys_cancelled: AtomicU64,
    keys_deadline_exceeded: AtomicU64,
    conflicts: AtomicU64,
}

impl ReadStats {
    fn record(&self, result: &KeyResult) {
        let counter = match result {
            Ok(Some(_)) => &self.keys_found,
            Ok(None) => &self.keys_missing,
            Err(ReadError::Cancelled) => &self.keys_cancelled,
            Err(ReadError::DeadlineExceeded { .. }) => &self.keys_deadline_exceeded,
            Err(_) => &self.keys_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReadStatsSnapshot {
        ReadStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            keys_found: self.keys_found.load(Ordering::Relaxed),
            keys_missing: self.keys_missing.load(Ordering::Relaxed),
            keys_failed: self.keys_failed.load(Ordering::Relaxed),
            keys_cancelled: self.keys_cancelled.load(Ordering::Relaxed),
            keys_deadline_exceeded: self.keys_deadline_exceeded.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`ReadStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadStatsSnapshot {
    pub requests: u64,
    pub keys_found: u64,
    pub keys_missing: u64,
    pub keys_failed: u64,
    pub keys_cancelled: u64,
    pub keys_deadline_exceeded: u64,
    /// Multi-read keys whose replicas disagreed.
    pub conflicts: u64,
}

/// Executes read requests against one pool and resolver.
pub struct ReadExecutor {
    resolver: Arc<dyn KeyResolver>,
    pool: ConnectionPool,
    dispatcher: ReplicaDispatcher,
    repairer: ReadRepairer,
    inflight: Arc<Semaphore>,
    options: ReadOptions,
    stats: Arc<ReadStats>,
}

impl ReadExecutor {
    pub fn new(
        resolver: Arc<dyn KeyResolver>,
        pool: ConnectionPool,
        options: ReadOptions,
        repair: RepairOptions,
    ) -> Self {
        Self {
            resolver,
            dispatcher: ReplicaDispatcher::new(pool.clone(), options.dispatch_timeout),
            repairer: ReadRepairer::new(pool.clone(), repair),
            pool,
            inflight: Arc::new(Semaphore::new(
                options.max_inflight_keys.clamp(1, Semaphore::MAX_PERMITS),
            )),
            options,
            stats: Arc::new(ReadStats::default()),
        }
    }

    pub fn stats(&self) -> ReadStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn repair_stats(&self) -> RepairStatsSnapshot {
        self.repairer.stats()
    }

    pub fn pool_stats(&self) -> PoolStatsSnapshot {
        self.pool.stats()
    }

    /// Run one request.
    ///
    /// Returns one result per sub-operation in input order: every key for
    /// `Gets`, at most the first key for `Get`. A key's failure never
    /// affects another key's result.
    pub async fn execute(
        &self,
        kind: OperationKind,
        namespace: &Arc<Namespace>,
        keys: &[LogicalKey],
        cancel: Option<CancelSignal>,
    ) -> Vec<KeyResult> {
        let profile = kind.profile();
        let mode = namespace.read_mode();
        let started = Instant::now();
        let deadline = self.options.request_timeout.map(|t| started + t);
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        trace_phase(OperationPhase::Start, profile, namespace);

        trace_phase(OperationPhase::Splitting, profile, namespace);
        let version = self.resolver.current_version();
        let subs = splitter::split(profile, namespace, keys, self.resolver.as_ref(), version);
        tracing::debug!(
            op = profile.name,
            namespace = %namespace.name,
            router_version = %version,
            keys = subs.len(),
            "request split"
        );

        let mut slots: Vec<Option<KeyResult>> = Vec::with_capacity(subs.len());
        let mut runnable = Vec::with_capacity(subs.len());
        for sub in subs {
            match sub {
                Ok(sub) => {
                    slots.push(None);
                    runnable.push(sub);
                }
                Err(err) => slots.push(Some(Err(ReadError::Resolution(err)))),
            }
        }

        let mut cancel = cancel;
        let already_cancelled = cancel.as_ref().is_some_and(CancelSignal::is_cancelled);
        let interrupted = if already_cancelled {
            Some(ReadError::Cancelled)
        } else {
            trace_phase(OperationPhase::Dispatching, profile, namespace);
            let mut pending: FuturesUnordered<_> = runnable
                .into_iter()
                .map(|sub| self.run_sub_operation(sub, profile, mode))
                .collect();

            let interrupted = loop {
                tokio::select! {
                    biased;
                    next = pending.next() => match next {
                        Some((index, result)) => slots[index] = Some(result),
                        None => break None,
                    },
                    _ = wait_cancelled(&mut cancel) => break Some(ReadError::Cancelled),
                    _ = wait_deadline(deadline) => break Some(ReadError::DeadlineExceeded {
                        timeout_ms: self.options.request_timeout.map_or(0, |t| t.as_millis() as u64),
                    }),
                }
            };
            // Dropping the unfinished sub-operations releases their leases.
            drop(pending);
            interrupted
        };

        if let Some(ref reason) = interrupted {
            tracing::debug!(
                op = profile.name,
                namespace = %namespace.name,
                unfinished = slots.iter().filter(|s| s.is_none()).count(),
                reason = %reason,
                "request interrupted"
            );
        }

        trace_phase(OperationPhase::Aggregating, profile, namespace);
        let unfinished = interrupted.unwrap_or(ReadError::Cancelled);
        let results: Vec<KeyResult> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(unfinished.clone())))
            .collect();
        for result in &results {
            self.stats.record(result);
        }

        tracing::debug!(
            op = profile.name,
            namespace = %namespace.name,
            keys = results.len(),
            failed = results.iter().filter(|r| r.is_err()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request complete"
        );
        trace_phase(OperationPhase::Done, profile, namespace);
        results
    }

    async fn run_sub_operation(
        &self,
        sub: SubOperation,
        profile: &OperationProfile,
        mode: ReadMode,
    ) -> (usize, KeyResult) {
        let index = sub.index;
        let Ok(_permit) = self.inflight.acquire().await else {
            return (index, Err(ReadError::Cancelled));
        };

        let attempts = self.dispatcher.dispatch(&sub, (profile.dispatch)(mode)).await;

        tracing::trace!(
            phase = OperationPhase::Reconciling.as_str(),
            key = %sub.key,
            shard = %sub.shard,
            attempts = attempts.len(),
            slowest_ms = attempts
                .iter()
                .map(|a| a.elapsed.as_millis() as u64)
                .max()
                .unwrap_or(0),
            "reconciling key"
        );
        let result = match (profile.merge)(mode) {
            MergeStrategy::FirstSuccess => reconciler::first_success(&sub, &attempts),
            MergeStrategy::CompareAndRepair => {
                let reconciliation =
                    reconciler::compare_and_reconcile(&sub, &attempts, self.options.conflict_policy);
                if let Some(conflict) = reconciliation.conflict {
                    self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        namespace = %sub.namespace.name,
                        router_version = %sub.router_version,
                        "{conflict}"
                    );
                }
                if let Some(plan) = reconciliation.repair {
                    self.repairer.schedule(plan);
                }
                reconciliation.result
            }
        };

        if let Err(ref err) = result {
            tracing::warn!(
                key = %sub.key,
                shard = %sub.shard,
                error = %err,
                "key read failed"
            );
        }
        (index, result)
    }
}

fn trace_phase(phase: OperationPhase, profile: &OperationProfile, namespace: &Namespace) {
    tracing::trace!(
        phase = phase.as_str(),
        op = profile.name,
        namespace = %namespace.name,
        "read phase"
    );
}

async fn wait_cancelled(cancel: &mut Option<CancelSignal>) {
    match cancel {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::routing::{HashKeyResolver, PhysicalKey, RouterVersion, RoutingTable};
    use crate::core::types::ReplicaIndex;
    use crate::net::memory::{InMemoryCluster, ReplicaFault};
    use crate::net::pool::PoolConfig;

    struct Harness {
        cluster: Arc<InMemoryCluster>,
        executor: ReadExecutor,
    }

    fn harness(replicas: usize, options: ReadOptions) -> Harness {
        let cluster = Arc::new(InMemoryCluster::new(replicas));
        let pool = ConnectionPool::new(cluster.clone(), PoolConfig::default());
        let resolver = Arc::new(HashKeyResolver::new(RoutingTable::new(
            RouterVersion(1),
            0,
            8,
        )));
        let executor = ReadExecutor::new(resolver, pool, options, RepairOptions::default());
        Harness { cluster, executor }
    }

    fn keys(names: &[&str]) -> Vec<LogicalKey> {
        names.iter().map(|k| LogicalKey::from(*k)).collect()
    }

    #[tokio::test]
    async fn results_follow_input_order() {
        let h = harness(2, ReadOptions::default());
        let ns = Arc::new(Namespace::new("ns", 1, 2));
        for k in ["a", "c"] {
            h.cluster.put_all(
                PhysicalKey::build(&ns, &LogicalKey::from(k)),
                Value::new(k.to_uppercase()),
            );
        }

        let results = h
            .executor
            .execute(OperationKind::Gets, &ns, &keys(&["c", "b", "a"]), None)
            .await;
        assert_eq!(
            results,
            vec![Ok(Some(Value::new("C"))), Ok(None), Ok(Some(Value::new("A")))]
        );
        let stats = h.executor.stats();
        assert_eq!(stats.keys_found, 2);
        assert_eq!(stats.keys_missing, 1);
    }

    #[tokio::test]
    async fn oversized_inflight_ceiling_is_clamped() {
        let h = harness(
            1,
            ReadOptions {
                max_inflight_keys: usize::MAX,
                ..ReadOptions::default()
            },
        );
        let ns = Arc::new(Namespace::new("ns", 1, 1));

        let results = h
            .executor
            .execute(OperationKind::Gets, &ns, &keys(&["a", "b"]), None)
            .await;
        assert_eq!(results, vec![Ok(None), Ok(None)]);
    }

    #[tokio::test]
    async fn empty_key_fails_alone() {
        let h = harness(1, ReadOptions::default());
        let ns = Arc::new(Namespace::new("ns", 1, 1));

        let results = h
            .executor
            .execute(OperationKind::Gets, &ns, &keys(&["a", "", "b"]), None)
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ReadError::Resolution(_))));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn inflight_ceiling_is_respected() {
        let h = harness(
            1,
            ReadOptions {
                max_inflight_keys: 2,
                ..ReadOptions::default()
            },
        );
        h.cluster
            .set_fault(ReplicaIndex(0), ReplicaFault::Delay(Duration::from_millis(10)));
        let ns = Arc::new(Namespace::new("ns", 1, 1));
        let many: Vec<LogicalKey> = (0..10).map(|i| LogicalKey::from(format!("k{i}"))).collect();

        let results = h.executor.execute(OperationKind::Gets, &ns, &many, None).await;
        assert_eq!(results.len(), 10);
        assert!(h.cluster.max_inflight_reads() <= 2);
    }

    #[tokio::test]
    async fn cancellation_releases_leases() {
        let h = harness(
            2,
            ReadOptions {
                dispatch_timeout: Duration::from_secs(5),
                ..ReadOptions::default()
            },
        );
        h.cluster.set_fault(ReplicaIndex(0), ReplicaFault::Hang);
        h.cluster.set_fault(ReplicaIndex(1), ReplicaFault::Hang);
        let ns = Arc::new(Namespace::new("ns", 1, 2));
        let input = keys(&["a", "b"]);
        let (handle, signal) = cancel_pair();

        let request = h
            .executor
            .execute(OperationKind::Gets, &ns, &input, Some(signal));
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        };
        let (results, ()) = tokio::join!(request, canceller);

        assert_eq!(results, vec![Err(ReadError::Cancelled), Err(ReadError::Cancelled)]);
        assert_eq!(h.executor.pool_stats().outstanding, 0);
        assert_eq!(h.cluster.inflight_reads(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_dispatches_nothing() {
        let h = harness(1, ReadOptions::default());
        let ns = Arc::new(Namespace::new("ns", 1, 1));
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let results = h
            .executor
            .execute(OperationKind::Get, &ns, &keys(&["a"]), Some(signal))
            .await;
        assert_eq!(results, vec![Err(ReadError::Cancelled)]);
        assert_eq!(h.cluster.reads(ReplicaIndex(0)), 0);
    }

    #[tokio::test]
    async fn request_deadline_marks_unfinished_keys() {
        let h = harness(
            1,
            ReadOptions {
                dispatch_timeout: Duration::from_secs(5),
                request_timeout: Some(Duration::from_millis(30)),
                ..ReadOptions::default()
            },
        );
        h.cluster.set_fault(ReplicaIndex(0), ReplicaFault::Hang);
        let ns = Arc::new(Namespace::new("ns", 1, 1));

        let results = h
            .executor
            .execute(OperationKind::Gets, &ns, &keys(&["a"]), None)
            .await;
        assert_eq!(
            results,
            vec![Err(ReadError::DeadlineExceeded { timeout_ms: 30 })]
        );
        assert_eq!(h.executor.stats().keys_deadline_exceeded, 1);
    }

    #[tokio::test]
    async fn multi_read_divergence_is_counted() {
        let h = harness(3, ReadOptions::default());
        let ns = Arc::new(Namespace::new("ns", 1, 3).with_multi_read(true));
        let key = PhysicalKey::build(&ns, &LogicalKey::from("k"));
        h.cluster.put(ReplicaIndex(0), key.clone(), Value::new("a"));
        h.cluster.put(ReplicaIndex(1), key.clone(), Value::new("a"));
        h.cluster.put(ReplicaIndex(2), key.clone(), Value::new("b"));

        let results = h
            .executor
            .execute(OperationKind::Get, &ns, &keys(&["k"]), None)
            .await;
        assert_eq!(results, vec![Ok(Some(Value::new("a")))]);
        assert_eq!(h.executor.stats().conflicts, 1);
        assert_eq!(h.executor.repair_stats().scheduled, 1);
    }

    #[tokio::test]
    async fn cancel_signal_survives_dropped_handle() {
        let (handle, mut signal) = cancel_pair();
        drop(handle);
        let waited =
            tokio::time::timeout(Duration::from_millis(10), signal.cancelled()).await;
        assert!(waited.is_err());
        assert!(!signal.is_cancelled());
    }
}
