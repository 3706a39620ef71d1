//! Lattice Read - CLI entrypoint.
//!
//! Usage:
//!   lattice-read config validate --config config/lattice-read.toml
//!   lattice-read config show --config config/lattice-read.toml --format json
//!   lattice-read route --config config/lattice-read.toml --namespace users alice bob

use anyhow::Result;
use clap::Parser;
use lattice_read::cli::commands::{run_config, run_route};
use lattice_read::cli::{init_tracing, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level());

    let overrides = cli.overrides();
    match cli.command {
        Commands::Config(args) => run_config(args, &overrides),
        Commands::Route(args) => run_route(args, &overrides),
    }
}
