//! Routing metadata consumed by the read path.
//!
//! - [`namespace`] - Namespace descriptors and registry
//! - [`routing`] - Router versions, key resolution and physical keys
//!
//! Shard-table maintenance and router version negotiation happen elsewhere;
//! this module only exposes the stable "resolve key to shard" seam.

pub mod namespace;
pub mod routing;
