//! Lattice Read - replicated read path for a sharded key-value access layer.
//!
//! A read request names a namespace and one or more logical keys. Each key is
//! resolved to a physical shard under a single router version, read from the
//! shard's replicas concurrently, and reconciled into one per-key result.
//! Namespaces flagged for multi-read compare every replica's answer and
//! repair stale replicas in the background.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         ReadClient                              │
//! │            get │ get_many │ get_many_with_cancel                │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ReadExecutor                             │
//! │   split → dispatch → reconcile → aggregate   (in-flight cap)    │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                       │                      │
//! ┌─────────────────┐   ┌─────────────────────┐   ┌────────────────┐
//! │   KeyResolver   │   │  ReplicaDispatcher  │   │  ReadRepairer  │
//! │ (router version)│   │  (per-replica tasks)│   │  (background)  │
//! └─────────────────┘   └─────────────────────┘   └────────────────┘
//!                                  │                      │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             ConnectionPool  →  ConnectionProvider               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::client`] - Read client facade
//! - [`core::error`] - Error taxonomy
//! - [`core::types`] - Keys, values, replica indices
//!
//! ## Control
//! - [`control::namespace`] - Namespace descriptors and registry
//! - [`control::routing`] - Key resolution under router versions
//!
//! ## Read path
//! - [`read::operation`] - Operation kinds and behaviour table
//! - [`read::splitter`] - Request splitting
//! - [`read::dispatcher`] - Replica fan-out
//! - [`read::reconciler`] - Result reconciliation
//! - [`read::repair`] - Read repair
//! - [`read::executor`] - Request lifecycle
//!
//! ## Networking
//! - [`net::connection`] - Connection traits
//! - [`net::pool`] - Connection pool
//! - [`net::memory`] - In-process replica backend
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - One router version per request, captured before any key is resolved
//! - N sub-operations in, N results out, in input order
//! - Failures stay with their key; a request never fails as a whole
//! - Every connection lease is released on every exit path
//! - Reconciliation is independent of replica arrival order

// Core infrastructure
pub mod core;

// Routing metadata
pub mod control;

// Read path
pub mod read;

// Networking
pub mod net;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::client::ReadClient;
pub use self::core::config::ClientConfig;
pub use self::core::error::{ReadError, ReadResult};
pub use self::core::types::{LogicalKey, ReplicaIndex, Value};
pub use control::namespace::Namespace;
pub use control::routing::{HashKeyResolver, KeyResolver, PhysicalShard, RouterVersion};
pub use net::connection::{Connection, ConnectionProvider};
pub use read::executor::{cancel_pair, CancelHandle, CancelSignal, KeyResult};
