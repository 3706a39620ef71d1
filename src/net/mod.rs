//! Replica connectivity.
//!
//! - [`connection`] - Connection and provider traits
//! - [`pool`] - Shared, bounded connection pool with scoped leases
//! - [`memory`] - In-process replica backend with fault injection

pub mod connection;
pub mod memory;
pub mod pool;
