//! Operation kinds and their per-kind behaviour.
//!
//! Each [`OperationKind`] maps to an [`OperationProfile`] in a static table.
//! A profile is a set of plain functions:
//! - `cardinality`: how many sub-operations a request of N keys splits into
//! - `fan_out`: how many replicas each sub-operation targets
//! - `dispatch`: whether dispatch stops at the first answer
//! - `merge`: how per-replica answers become one result

use crate::control::namespace::{Namespace, ReadMode};
use serde::{Deserialize, Serialize};

/// Read operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Single-key read.
    Get,
    /// Batch read, one sub-operation per key.
    Gets,
}

/// When dispatch to a replica set is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchShape {
    /// Stop at the first successful answer; abandon the rest.
    FirstSuccess,
    /// Wait for every replica or the dispatcher deadline.
    AllReplicas,
}

/// How per-replica answers are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The first successful answer is the result.
    FirstSuccess,
    /// Compare all answers, pick a canonical value, repair stale replicas.
    CompareAndRepair,
}

/// Per-kind behaviour.
#[derive(Debug)]
pub struct OperationProfile {
    pub kind: OperationKind,
    pub name: &'static str,
    pub cardinality: fn(usize) -> usize,
    pub fan_out: fn(&Namespace) -> usize,
    pub dispatch: fn(ReadMode) -> DispatchShape,
    pub merge: fn(ReadMode) -> MergeStrategy,
}

static PROFILES: [OperationProfile; 2] = [
    OperationProfile {
        kind: OperationKind::Get,
        name: "get",
        cardinality: single_key,
        fan_out: copy_count,
        dispatch: dispatch_for_mode,
        merge: merge_for_mode,
    },
    OperationProfile {
        kind: OperationKind::Gets,
        name: "gets",
        cardinality: per_key,
        fan_out: copy_count,
        dispatch: dispatch_for_mode,
        merge: merge_for_mode,
    },
];

impl OperationKind {
    /// Profile for this kind.
    pub fn profile(self) -> &'static OperationProfile {
        match self {
            Self::Get => &PROFILES[0],
            Self::Gets => &PROFILES[1],
        }
    }
}

fn single_key(keys: usize) -> usize {
    keys.min(1)
}

fn per_key(keys: usize) -> usize {
    keys
}

fn copy_count(namespace: &Namespace) -> usize {
    namespace.copy_count as usize
}

fn dispatch_for_mode(mode: ReadMode) -> DispatchShape {
    match mode {
        ReadMode::Read => DispatchShape::FirstSuccess,
        ReadMode::MultiRead => DispatchShape::AllReplicas,
    }
}

fn merge_for_mode(mode: ReadMode) -> MergeStrategy {
    match mode {
        ReadMode::Read => MergeStrategy::FirstSuccess,
        ReadMode::MultiRead => MergeStrategy::CompareAndRepair,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_kind() {
        for kind in [OperationKind::Get, OperationKind::Gets] {
            assert_eq!(kind.profile().kind, kind);
        }
        assert_eq!(OperationKind::Gets.profile().name, "gets");
    }

    #[test]
    fn cardinality_per_kind() {
        assert_eq!((OperationKind::Get.profile().cardinality)(5), 1);
        assert_eq!((OperationKind::Get.profile().cardinality)(0), 0);
        assert_eq!((OperationKind::Gets.profile().cardinality)(5), 5);
    }

    #[test]
    fn read_mode_selects_dispatch_and_merge() {
        let profile = OperationKind::Gets.profile();
        assert_eq!((profile.dispatch)(ReadMode::Read), DispatchShape::FirstSuccess);
        assert_eq!((profile.merge)(ReadMode::Read), MergeStrategy::FirstSuccess);
        assert_eq!((profile.dispatch)(ReadMode::MultiRead), DispatchShape::AllReplicas);
        assert_eq!(
            (profile.merge)(ReadMode::MultiRead),
            MergeStrategy::CompareAndRepair
        );
    }

    #[test]
    fn fan_out_is_copy_count() {
        let ns = Namespace::new("ns", 1, 3);
        assert_eq!((OperationKind::Get.profile().fan_out)(&ns), 3);
    }
}
