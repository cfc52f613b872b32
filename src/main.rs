//! LeakSleuth — thread leak detection for test suites.
//!
//! Thin binary entry point. All logic lives in the `leaksleuth-core`
//! and `leaksleuth-cli` crates.

use clap::Parser;
use leaksleuth_cli::{Cli, ERROR_EXIT_CODE};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable.
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("LeakSleuth starting");

    let mut stdout = std::io::stdout().lock();
    match leaksleuth_cli::run(&cli, &mut stdout) {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(ERROR_EXIT_CODE)
        }
    }
}
