/// Command-line arguments.
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "leaksleuth",
    version,
    about = "Snapshot the threads of a process and report the ones that should not be there"
)]
pub struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the raw, unfiltered thread dump.
    Dump {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Capture a filtered snapshot.
    Snapshot {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_enum, default_value_t = SnapshotFormat::Text)]
        format: SnapshotFormat,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compare the current threads against a saved JSON snapshot.
    Diff {
        /// Snapshot written by `leaksleuth snapshot --format json`.
        #[arg(long)]
        baseline: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        /// How long to wait for extra threads to exit.
        #[arg(long)]
        window_ms: Option<u64>,
        /// Sleep between two snapshots while waiting.
        #[arg(long)]
        poll_ms: Option<u64>,
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
    /// Print the effective noise table.
    Noise {
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
}

/// Where thread dumps come from. Defaults to the `leaksleuth` process itself.
#[derive(Debug, Clone, Default, Args)]
pub struct SourceArgs {
    /// Dump the threads of this process.
    #[arg(long, conflicts_with = "from_file")]
    pub pid: Option<u32>,
    /// Read a saved dump instead of a live process.
    #[arg(long)]
    pub from_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SnapshotFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}
