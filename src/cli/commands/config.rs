//! Config command implementation.

use crate::core::config::{ClientConfig, ConfigOverrides};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/lattice-read.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults and overrides applied.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/lattice-read.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs, overrides: &ConfigOverrides) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config, overrides),
        ConfigCommand::Show { config, format } => {
            let config = load_config(&config, overrides)?;
            println!("{}", render_config(&config, &format)?);
            Ok(())
        }
    }
}

/// Load a config file and apply CLI overrides.
pub(crate) fn load_config(path: &Path, overrides: &ConfigOverrides) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_file(path)
        .with_context(|| format!("failed to load config from {:?}", path))?;
    config.apply_overrides(overrides);
    config
        .validate()
        .context("configuration invalid after applying overrides")?;
    Ok(config)
}

fn validate_config(path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(path, overrides)?;

    println!("✓ Configuration valid: {}", path.display());
    println!(
        "  routing: version {}, {} shards",
        config.routing.router_version, config.routing.shard_count
    );
    if config.namespaces.is_empty() {
        println!("  ⚠ Warning: no [[namespaces]] defined; every read will be rejected");
    }
    for ns in &config.namespaces {
        println!(
            "  namespace {} (id {}): copy_count {}, {}",
            ns.name,
            ns.id,
            ns.copy_count,
            if ns.multi_read { "multi-read" } else { "read" }
        );
    }
    if !config.repair.enabled && config.namespaces.iter().any(|ns| ns.multi_read) {
        println!("  ⚠ Warning: read repair disabled; divergent replicas will not converge");
    }
    Ok(())
}

fn render_config(config: &ClientConfig, format: &str) -> Result<String> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(config)?),
        "toml" => Ok(toml::to_string_pretty(config)?),
        other => anyhow::bail!("unsupported format: {other} (expected toml or json)"),
    }
}
