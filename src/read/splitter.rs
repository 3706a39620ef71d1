//! Request splitting.
//!
//! A request is expanded into independent [`SubOperation`]s, one per key the
//! operation kind admits. Each carries its own resolved shard and physical
//! key. Output is index-aligned with the input so results can be zipped back
//! in order; a key that fails to resolve occupies its slot as an error and
//! does not affect its neighbours.

use crate::control::namespace::Namespace;
use crate::control::routing::{KeyResolver, PhysicalKey, PhysicalShard, RouterVersion};
use crate::core::error::ResolutionError;
use crate::core::types::LogicalKey;
use crate::read::operation::OperationProfile;
use std::sync::Arc;

/// One key of a request, routed and ready for dispatch.
#[derive(Debug, Clone)]
pub struct SubOperation {
    /// Position of the key in the request.
    pub index: usize,
    pub key: LogicalKey,
    pub physical_key: PhysicalKey,
    pub namespace: Arc<Namespace>,
    pub shard: PhysicalShard,
    /// Router version the shard was resolved with.
    pub router_version: RouterVersion,
    /// Replicas to target, before clamping to the shard's replica set.
    pub fan_out: usize,
}

/// Split a request into sub-operations resolved at `version`.
pub fn split(
    profile: &OperationProfile,
    namespace: &Arc<Namespace>,
    keys: &[LogicalKey],
    resolver: &dyn KeyResolver,
    version: RouterVersion,
) -> Vec<Result<SubOperation, ResolutionError>> {
    let count = (profile.cardinality)(keys.len());
    let fan_out = (profile.fan_out)(&**namespace);

    keys.iter()
        .take(count)
        .enumerate()
        .map(|(index, key)| {
            let shard = resolver.resolve(namespace, key, version)?;
            Ok(SubOperation {
                index,
                key: key.clone(),
                physical_key: PhysicalKey::build(namespace, key),
                namespace: namespace.clone(),
                shard,
                router_version: version,
                fan_out,
            })
        })
        .collect()
}
