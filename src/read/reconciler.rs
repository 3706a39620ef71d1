//! Per-key result reconciliation.
//!
//! Single-read keys take the first successful replica answer. Multi-read
//! keys compare every successful answer; when replicas diverge a canonical
//! value is chosen by [`ConflictPolicy`] and the replicas that answered with
//! something else are listed in a [`RepairPlan`].
//!
//! Reconciliation never depends on arrival order: answers are ordered by
//! replica index before comparison, so identical inputs always produce the
//! same canonical value.

use crate::control::routing::{PhysicalKey, PhysicalShard};
use crate::core::error::{ReadError, ReadResult, ReconciliationConflict};
use crate::core::types::{LogicalKey, ReplicaIndex, Value};
use crate::read::dispatcher::ReplicaAttempt;
use crate::read::splitter::SubOperation;
use serde::{Deserialize, Serialize};

/// How a canonical value is picked among divergent replicas.
///
/// A present value always outranks a miss, so a replica that lost a key is
/// repaired rather than allowed to erase it from the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Most common value; ties go to the lowest replica index.
    #[default]
    Majority,
    /// Highest version stamp; ties fall back to majority.
    LatestVersion,
}

/// Repair writes needed to converge a key's replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPlan {
    pub key: LogicalKey,
    pub physical_key: PhysicalKey,
    pub shard: PhysicalShard,
    /// Canonical value to write.
    pub value: Value,
    /// Replicas that answered with a different value or a miss.
    pub targets: Vec<ReplicaIndex>,
}

/// Result of multi-read reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub result: ReadResult<Option<Value>>,
    pub conflict: Option<ReconciliationConflict>,
    pub repair: Option<RepairPlan>,
}

/// First successful answer wins.
///
/// With no success, the key fails with `AllReplicasUnavailable` carrying the
/// last failure that says something about replica health; timeouts and
/// abandoned attempts are skipped.
pub fn first_success(sub: &SubOperation, attempts: &[ReplicaAttempt]) -> ReadResult<Option<Value>> {
    if let Some(value) = attempts.iter().find_map(|a| a.outcome.as_ref().ok()) {
        return Ok(value.clone());
    }
    Err(unavailable(sub, attempts))
}

/// Compare all successful answers and pick a canonical value.
pub fn compare_and_reconcile(
    sub: &SubOperation,
    attempts: &[ReplicaAttempt],
    policy: ConflictPolicy,
) -> Reconciliation {
    let mut answers: Vec<(ReplicaIndex, Option<&Value>)> = attempts
        .iter()
        .filter_map(|a| a.outcome.as_ref().ok().map(|v| (a.replica, v.as_ref())))
        .collect();

    if answers.is_empty() {
        return Reconciliation {
            result: Err(unavailable(sub, attempts)),
            conflict: None,
            repair: None,
        };
    }
    answers.sort_by_key(|(replica, _)| *replica);

    let candidates = group_candidates(&answers);
    let Some(winner) = pick(&candidates, policy) else {
        return Reconciliation {
            result: Ok(None),
            conflict: None,
            repair: None,
        };
    };

    let stale: Vec<ReplicaIndex> = answers
        .iter()
        .filter(|(_, value)| *value != Some(winner.value))
        .map(|(replica, _)| *replica)
        .collect();

    if stale.is_empty() {
        return Reconciliation {
            result: Ok(Some(winner.value.clone())),
            conflict: None,
            repair: None,
        };
    }

    let misses = usize::from(answers.iter().any(|(_, v)| v.is_none()));
    let conflict = ReconciliationConflict {
        key: sub.key.clone(),
        shard: sub.shard,
        canonical_replica: winner.holders[0],
        stale_replicas: stale.clone(),
        distinct_values: candidates.len() + misses,
    };
    let repair = RepairPlan {
        key: sub.key.clone(),
        physical_key: sub.physical_key.clone(),
        shard: sub.shard,
        value: winner.value.clone(),
        targets: stale,
    };
    Reconciliation {
        result: Ok(Some(winner.value.clone())),
        conflict: Some(conflict),
        repair: Some(repair),
    }
}

struct Candidate<'a> {
    value: &'a Value,
    /// Replicas holding this value, ascending.
    holders: Vec<ReplicaIndex>,
}

/// Group present values. `answers` is sorted by replica, so candidates come
/// out ordered by their lowest holder.
fn group_candidates<'a>(answers: &[(ReplicaIndex, Option<&'a Value>)]) -> Vec<Candidate<'a>> {
    let mut candidates: Vec<Candidate<'a>> = Vec::new();
    for (replica, value) in answers {
        let Some(value) = *value else { continue };
        match candidates.iter_mut().find(|c| c.value == value) {
            Some(candidate) => candidate.holders.push(*replica),
            None => candidates.push(Candidate {
                value,
                holders: vec![*replica],
            }),
        }
    }
    candidates
}

/// Earliest candidate wins any tie, which is the lowest replica index.
fn pick<'c, 'a>(candidates: &'c [Candidate<'a>], policy: ConflictPolicy) -> Option<&'c Candidate<'a>> {
    let mut best: Option<&Candidate<'a>> = None;
    for candidate in candidates {
        let better = match best {
            None => true,
            Some(current) => match policy {
                ConflictPolicy::Majority => candidate.holders.len() > current.holders.len(),
                ConflictPolicy::LatestVersion => {
                    (candidate.value.version, candidate.holders.len())
                        > (current.value.version, current.holders.len())
                }
            },
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

fn unavailable(sub: &SubOperation, attempts: &[ReplicaAttempt]) -> ReadError {
    let last_error = attempts
        .iter()
        .rev()
        .filter_map(|a| a.outcome.as_ref().err())
        .find(|err| !err.is_silent())
        .cloned();
    ReadError::AllReplicasUnavailable {
        shard: sub.shard,
        attempted: attempts.len(),
        last_error,
    }
}
