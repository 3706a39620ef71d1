//! Command-line interface.
//!
//! Offline tooling for client configuration: validate and print config
//! files, and show where keys route.

pub mod commands;

use crate::core::config::{ClientConfig, ConfigOverrides};
use clap::{Parser, Subcommand};
use std::path::Path;

/// Level used when neither the flag nor a readable config sets one.
pub const FALLBACK_LOG_LEVEL: &str = "warn";

/// Lattice Read - replicated read path tooling.
#[derive(Parser, Debug)]
#[command(name = "lattice-read")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Override read.dispatch_timeout_ms.
    #[arg(long, global = true)]
    pub dispatch_timeout_ms: Option<u64>,

    /// Override read.max_inflight_keys.
    #[arg(long, global = true)]
    pub max_inflight_keys: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Config overrides carried by global flags.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            log_level: self.log_level.clone(),
            dispatch_timeout_ms: self.dispatch_timeout_ms,
            max_inflight_keys: self.max_inflight_keys,
        }
    }

    /// Log level for this invocation.
    ///
    /// `--log-level` wins over the config file's `[telemetry] log_level`. A
    /// config that cannot be loaded falls back to [`FALLBACK_LOG_LEVEL`];
    /// the command itself reports the load error.
    pub fn log_level(&self) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        ClientConfig::from_file(self.command.config_path())
            .map(|config| config.telemetry.log_level)
            .unwrap_or_else(|_| FALLBACK_LOG_LEVEL.to_string())
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Show the shard and physical key for keys of a namespace.
    Route(commands::RouteArgs),
}

impl Commands {
    /// Config file the command reads.
    pub fn config_path(&self) -> &Path {
        match self {
            Commands::Config(args) => match &args.command {
                commands::ConfigCommand::Validate { config } => config.as_path(),
                commands::ConfigCommand::Show { config, .. } => config.as_path(),
            },
            Commands::Route(args) => args.config.as_path(),
        }
    }
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` takes precedence over `default_level`.
#[cfg(feature = "telemetry")]
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_default_level: &str) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(log_level: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "[routing]\nshard_count = 4\n\n[telemetry]\nlog_level = \"{log_level}\"\n"
        )
        .unwrap();
        file
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn log_level_comes_from_config() {
        let file = config_file("debug");
        let path = file.path().to_str().unwrap();
        let cli = parse(&["lattice-read", "config", "validate", "--config", path]);
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn log_level_flag_overrides_config() {
        let file = config_file("debug");
        let path = file.path().to_str().unwrap();
        let cli = parse(&[
            "lattice-read",
            "--log-level",
            "error",
            "route",
            "--config",
            path,
            "--namespace",
            "users",
            "k",
        ]);
        assert_eq!(cli.log_level(), "error");
    }

    #[test]
    fn unreadable_config_falls_back() {
        let cli = parse(&[
            "lattice-read",
            "config",
            "show",
            "--config",
            "/nonexistent/lattice-read.toml",
        ]);
        assert_eq!(cli.log_level(), FALLBACK_LOG_LEVEL);
    }
}
