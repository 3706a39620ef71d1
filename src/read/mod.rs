//! Replicated read path.
//!
//! - [`operation`] - Operation kinds and their per-kind behaviour table
//! - [`splitter`] - Request splitting into per-key sub-operations
//! - [`dispatcher`] - Concurrent per-replica dispatch with a deadline
//! - [`reconciler`] - First-success and compare-and-repair merging
//! - [`repair`] - Background repair writes for divergent replicas
//! - [`executor`] - Request lifecycle, concurrency ceiling, cancellation

pub mod dispatcher;
pub mod executor;
pub mod operation;
pub mod reconciler;
pub mod repair;
pub mod splitter;
