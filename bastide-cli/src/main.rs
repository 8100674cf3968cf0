//! `Bastide` CLI - keeps SSH tunnels through cloud bastion sessions alive
//!
//! Provides commands for running one context in fullauto mode, running the
//! stack or a parallel set, managing contexts, and attaching to a running
//! tunnel.

mod cli;
mod commands;
mod error;
mod util;

use bastide_core::{TracingConfig, TracingLevel, init_tracing};
use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let config_path = cli.config.as_deref();

    let result = commands::dispatch(config_path, cli.command);

    if let Err(e) = result {
        if !cli.quiet {
            eprintln!("Error: {e}");
        }
        std::process::exit(e.exit_code());
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        TracingLevel::Error
    } else if cli.debug && cli.verbose < 2 {
        TracingLevel::Debug
    } else {
        TracingLevel::from_verbosity(cli.verbose)
    };

    let mut config = TracingConfig::new().with_level(level);
    if let Some(filter) = &cli.log_filter {
        config = config.with_filter(filter.clone());
    }
    if let Err(e) = init_tracing(&config) {
        eprintln!("Warning: logging disabled: {e}");
    }
}
