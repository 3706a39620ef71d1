//! Core client infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`client`] - Read client facade
//! - [`error`] - Error taxonomy for resolution, attempts and reads
//! - [`types`] - Keys, values and replica indices

pub mod client;
pub mod config;
pub mod error;
pub mod types;
