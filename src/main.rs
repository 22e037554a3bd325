//! Binary entry point for **vpn-impact**.
//!
//! * Parses CLI arguments.
//! * Installs the `tracing` subscriber (stderr, `RUST_LOG` aware).
//! * Runs the selected subcommand.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vpn_impact::{cli::Args, engine};

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match engine::run(args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
