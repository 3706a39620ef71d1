//! Route command implementation.

use super::config::load_config;
use crate::control::namespace::NamespaceRegistry;
use crate::control::routing::{HashKeyResolver, KeyResolver, PhysicalKey, RouterVersion};
use crate::core::config::{ClientConfig, ConfigOverrides};
use crate::core::types::LogicalKey;
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

/// Show where keys route.
#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Config file path.
    #[arg(short, long, default_value = "config/lattice-read.toml")]
    pub config: PathBuf,

    /// Namespace the keys belong to.
    #[arg(short, long)]
    pub namespace: String,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,

    /// Keys to route.
    #[arg(required = true)]
    pub keys: Vec<String>,
}

/// Routing outcome for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedKey {
    pub key: String,
    pub router_version: u64,
    /// `None` when the key could not be resolved.
    pub shard: Option<u32>,
    pub physical_key: Option<String>,
    pub error: Option<String>,
}

/// Run the route command.
pub fn run_route(args: RouteArgs, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(&args.config, overrides)?;
    let routed = route_keys(&config, &args.namespace, &args.keys)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&routed)?);
        return Ok(());
    }
    for entry in &routed {
        match (&entry.shard, &entry.physical_key, &entry.error) {
            (Some(shard), Some(physical_key), _) => println!(
                "{}\tv{}\tvnode-{}\t{}",
                entry.key, entry.router_version, shard, physical_key
            ),
            (_, _, error) => println!(
                "{}\tv{}\terror: {}",
                entry.key,
                entry.router_version,
                error.as_deref().unwrap_or("unresolved")
            ),
        }
    }
    Ok(())
}

/// Resolve keys of one namespace with the configured routing table.
pub fn route_keys(config: &ClientConfig, namespace: &str, keys: &[String]) -> Result<Vec<RoutedKey>> {
    let registry = NamespaceRegistry::from_config(&config.namespaces);
    let namespace = registry.get(namespace)?;
    let resolver = HashKeyResolver::new(config.routing_table());
    let version = resolver.current_version();

    Ok(keys
        .iter()
        .map(|raw| {
            let key = LogicalKey::from(raw.as_str());
            let RouterVersion(router_version) = version;
            match resolver.resolve(&namespace, &key, version) {
                Ok(shard) => RoutedKey {
                    key: raw.clone(),
                    router_version,
                    shard: Some(shard.vnode),
                    physical_key: Some(PhysicalKey::build(&namespace, &key).to_string()),
                    error: None,
                },
                Err(err) => RoutedKey {
                    key: raw.clone(),
                    router_version,
                    shard: None,
                    physical_key: None,
                    error: Some(err.to_string()),
                },
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::from_toml(
            r#"
[routing]
router_version = 4
hash_seed = 9
shard_count = 16

[[namespaces]]
name = "users"
id = 3
"#,
        )
        .unwrap()
    }

    #[test]
    fn routes_keys_in_order() {
        let keys = vec!["alice".to_string(), "bob".to_string()];
        let routed = route_keys(&config(), "users", &keys).unwrap();

        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].key, "alice");
        assert_eq!(routed[0].router_version, 4);
        assert_eq!(routed[0].physical_key.as_deref(), Some("3:alice"));
        assert!(routed.iter().all(|r| r.shard.is_some_and(|s| s < 16)));
    }

    #[test]
    fn empty_key_reports_error() {
        let routed = route_keys(&config(), "users", &[String::new()]).unwrap();
        assert!(routed[0].shard.is_none());
        assert!(routed[0].error.is_some());
    }

    #[test]
    fn unknown_namespace_fails() {
        let err = route_keys(&config(), "orders", &["x".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown namespace"));
    }
}
