/// LeakSleuth CLI — command-line frontend over `leaksleuth-core`.
///
/// Parses arguments with clap and dispatches to the command implementations.
/// The binary crate only initialises logging and maps the result to an exit
/// code.
pub mod args;
pub mod commands;
pub mod export;

pub use args::Cli;
pub use commands::{Status, ERROR_EXIT_CODE};

use std::io::Write;

/// Run a parsed command line, writing primary output to `out`.
pub fn run(cli: &Cli, out: &mut dyn Write) -> anyhow::Result<Status> {
    commands::execute(&cli.command, out)
}
