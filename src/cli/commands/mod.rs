//! CLI command implementations.

mod config;
mod route;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use route::{route_keys, run_route, RouteArgs, RoutedKey};
