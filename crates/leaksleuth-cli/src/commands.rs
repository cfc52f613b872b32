/// Command execution.
///
/// Every command writes its primary output to the supplied writer so that
/// the binary can hand in stdout and tests can hand in a buffer.
use crate::args::{Command, ReportFormat, SnapshotFormat, SourceArgs};
use crate::export::{self, SnapshotFile};
use anyhow::Context;
use leaksleuth_core::dump::{StackDumper, StaticDump};
use leaksleuth_core::{DetectorConfig, ReconcileOutcome, RecordingContext};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    LeaksFound,
}

impl Status {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::LeaksFound => 1,
        }
    }
}

/// Exit code for usage and I/O errors.
pub const ERROR_EXIT_CODE: u8 = 2;

/// A resolved dump source.
struct Source {
    dumper: Arc<dyn StackDumper>,
    pid: Option<u32>,
    is_file: bool,
}

impl SourceArgs {
    fn resolve(&self) -> anyhow::Result<Source> {
        if let Some(path) = &self.from_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read dump {}", path.display()))?;
            return Ok(Source {
                dumper: Arc::new(StaticDump::new(text)),
                pid: None,
                is_file: true,
            });
        }
        live_source(self.pid)
    }
}

#[cfg(target_os = "linux")]
fn live_source(pid: Option<u32>) -> anyhow::Result<Source> {
    use leaksleuth_core::dump::ProcDumper;

    let dumper = match pid {
        Some(pid) => ProcDumper::for_pid(pid),
        None => ProcDumper::current(),
    };
    Ok(Source {
        dumper: Arc::new(dumper),
        pid: Some(pid.unwrap_or_else(std::process::id)),
        is_file: false,
    })
}

#[cfg(not(target_os = "linux"))]
fn live_source(_pid: Option<u32>) -> anyhow::Result<Source> {
    anyhow::bail!("live thread dumps need /proc (Linux only); use --from-file")
}

fn load_config() -> anyhow::Result<DetectorConfig> {
    DetectorConfig::from_env().context("invalid leak detector configuration")
}

pub fn execute(command: &Command, out: &mut dyn Write) -> anyhow::Result<Status> {
    match command {
        Command::Dump { source } => dump(source, out),
        Command::Snapshot {
            source,
            format,
            output,
        } => snapshot(source, *format, output.as_deref(), out),
        Command::Diff {
            baseline,
            source,
            window_ms,
            poll_ms,
            format,
        } => diff(baseline, source, *window_ms, *poll_ms, *format, out),
        Command::Noise { format } => noise(*format, out),
    }
}

fn dump(source: &SourceArgs, out: &mut dyn Write) -> anyhow::Result<Status> {
    let config = load_config()?;
    let source = source.resolve()?;
    let text = config.snapshotter(source.dumper).raw_dump()?;
    writeln!(out, "{}", text.trim_end())?;
    Ok(Status::Ok)
}

fn snapshot(
    source: &SourceArgs,
    format: SnapshotFormat,
    output: Option<&Path>,
    out: &mut dyn Write,
) -> anyhow::Result<Status> {
    let config = load_config()?;
    let source = source.resolve()?;
    let snapshotter = config.snapshotter(source.dumper);
    let tasks = snapshotter.try_capture()?;
    info!("Captured {} interesting thread(s)", tasks.len());

    let file = SnapshotFile::new(tasks, snapshotter.dumper().describe(), source.pid);
    match output {
        Some(path) => {
            let mut writer = std::io::BufWriter::new(
                std::fs::File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?,
            );
            write_snapshot(&mut writer, format, &file)?;
            writer.flush()?;
        }
        None => write_snapshot(out, format, &file)?,
    }
    Ok(Status::Ok)
}

fn write_snapshot(
    out: &mut dyn Write,
    format: SnapshotFormat,
    file: &SnapshotFile,
) -> anyhow::Result<()> {
    match format {
        SnapshotFormat::Text => export::write_snapshot_text(out, &file.tasks),
        SnapshotFormat::Csv => export::write_snapshot_csv(out, &file.tasks),
        SnapshotFormat::Json => export::write_snapshot_json(out, file),
    }
}

fn diff(
    baseline: &Path,
    source: &SourceArgs,
    window_ms: Option<u64>,
    poll_ms: Option<u64>,
    format: ReportFormat,
    out: &mut dyn Write,
) -> anyhow::Result<Status> {
    let mut config = load_config()?;
    if let Some(window_ms) = window_ms {
        config.window_ms = window_ms;
    }
    if let Some(poll_ms) = poll_ms {
        config.poll_interval_ms = poll_ms;
    }
    config.validate()?;

    let baseline = SnapshotFile::read(baseline)?;
    let source = source.resolve()?;
    if let (Some(expected), Some(actual)) = (baseline.pid, source.pid) {
        if expected != actual {
            debug!("Baseline was taken from pid {expected}, comparing against pid {actual}");
        }
    }

    let mut reconciler = config.reconciler(source.dumper);
    if source.is_file {
        // A saved dump never changes; waiting for it is pointless.
        reconciler = reconciler.with_window(Duration::ZERO);
    }

    let ctx = RecordingContext::new();
    match reconciler.try_reconcile(&baseline.tasks, &ctx)? {
        ReconcileOutcome::Leaked(report) => {
            match format {
                ReportFormat::Text => export::write_report_text(out, &report)?,
                ReportFormat::Json => export::write_report_json(out, &report)?,
            }
            Ok(Status::LeaksFound)
        }
        ReconcileOutcome::Clean { attempts } => {
            match format {
                ReportFormat::Text => writeln!(out, "no leaked threads ({attempts} snapshot(s))")?,
                ReportFormat::Json => {
                    export::write_report_json(out, &leaksleuth_core::LeakReport::default())?
                }
            }
            Ok(Status::Ok)
        }
        ReconcileOutcome::Skipped(reason) => {
            anyhow::bail!("leak check skipped unexpectedly: {reason:?}")
        }
    }
}

fn noise(format: ReportFormat, out: &mut dyn Write) -> anyhow::Result<Status> {
    let table = load_config()?.noise_table();
    match format {
        ReportFormat::Text => export::write_noise_text(out, &table)?,
        ReportFormat::Json => export::write_noise_json(out, &table)?,
    }
    Ok(Status::Ok)
}
