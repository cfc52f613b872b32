/// End-to-end tests for the command-line frontend.
///
/// Commands are parsed with the real clap definition and executed against
/// dump files in a temporary directory, with output captured in a buffer.
use clap::Parser;
use leaksleuth_cli::export::SnapshotFile;
use leaksleuth_cli::{run, Cli, Status};
use leaksleuth_core::TaskId;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────────────

const BEFORE: &str = "\
thread 100 [running]:
name: main
wchan: 0

thread 101 [sleeping]:
name: gmain
wchan: do_poll

thread 102 [sleeping]:
name: db-pool
wchan: futex_wait_queue
";

const AFTER: &str = "\
thread 100 [running]:
name: main

thread 102 [sleeping]:
name: db-pool
wchan: futex_wait_queue

thread 177 [sleeping]:
name: leaky-worker
wchan: pipe_read

thread 180 [sleeping]:
name: signal-hook
wchan: pipe_read
";

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn run_args(args: &[&str]) -> (anyhow::Result<Status>, String) {
    let cli = Cli::try_parse_from(std::iter::once("leaksleuth").chain(args.iter().copied()))
        .expect("arguments should parse");
    let mut out = Vec::new();
    let status = run(&cli, &mut out);
    (status, String::from_utf8(out).unwrap())
}

/// Save a JSON baseline of `dump` and return its path.
fn save_baseline(dir: &Path, dump: &str) -> PathBuf {
    let dump_path = write_file(dir, "before.txt", dump);
    let baseline = dir.join("baseline.json");
    let (status, _) = run_args(&[
        "snapshot",
        "--from-file",
        dump_path.to_str().unwrap(),
        "--format",
        "json",
        "--output",
        baseline.to_str().unwrap(),
    ]);
    assert_eq!(status.unwrap(), Status::Ok);
    baseline
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// `dump` prints the file unfiltered.
#[test]
fn dump_prints_raw_records() {
    let tmp = TempDir::new().unwrap();
    let path = write_file(tmp.path(), "dump.txt", BEFORE);

    let (status, out) = run_args(&["dump", "--from-file", path.to_str().unwrap()]);
    assert_eq!(status.unwrap(), Status::Ok);
    assert_eq!(out, BEFORE);
}

/// The JSON snapshot keeps interesting threads only.
#[test]
fn snapshot_json_filters_noise() {
    let tmp = TempDir::new().unwrap();
    let baseline = save_baseline(tmp.path(), BEFORE);

    let file = SnapshotFile::read(&baseline).unwrap();
    assert_eq!(
        file.tasks.ids().collect::<Vec<_>>(),
        vec![TaskId(100), TaskId(102)]
    );
    assert_eq!(file.pid, None);
    assert_eq!(file.source, "static dump");
}

/// The text snapshot drops noise and keeps the dump format.
#[test]
fn snapshot_text_to_stdout() {
    let tmp = TempDir::new().unwrap();
    let path = write_file(tmp.path(), "dump.txt", BEFORE);

    let (status, out) = run_args(&["snapshot", "--from-file", path.to_str().unwrap()]);
    assert_eq!(status.unwrap(), Status::Ok);
    assert!(out.starts_with("thread 100 [running]:"));
    assert!(!out.contains("gmain"));
    assert!(out.contains("\n\nthread 102 [sleeping]:"));
}

/// CSV output has a header row plus one row per interesting thread.
#[test]
fn snapshot_csv() {
    let tmp = TempDir::new().unwrap();
    let path = write_file(tmp.path(), "dump.txt", BEFORE);

    let (status, out) = run_args(&[
        "snapshot",
        "--from-file",
        path.to_str().unwrap(),
        "--format",
        "csv",
    ]);
    assert_eq!(status.unwrap(), Status::Ok);
    let mut reader = csv::Reader::from_reader(out.as_bytes());
    assert_eq!(
        reader.headers().unwrap().iter().collect::<Vec<_>>(),
        vec!["id", "state", "record"]
    );
    assert_eq!(reader.records().count(), 2);
}

/// A new non-noise thread is reported, noise and exited threads are not.
#[test]
fn diff_reports_new_threads() {
    let tmp = TempDir::new().unwrap();
    let baseline = save_baseline(tmp.path(), BEFORE);
    let after = write_file(tmp.path(), "after.txt", AFTER);

    let (status, out) = run_args(&[
        "diff",
        "--baseline",
        baseline.to_str().unwrap(),
        "--from-file",
        after.to_str().unwrap(),
    ]);
    assert_eq!(status.unwrap(), Status::LeaksFound);
    assert!(out.starts_with("Leaked thread: thread 177 [sleeping]:\nname: leaky-worker"));
    assert!(!out.contains("signal-hook"));
    assert!(out.ends_with("1 leaked thread(s)\n"));
}

#[test]
fn diff_json_report() {
    let tmp = TempDir::new().unwrap();
    let baseline = save_baseline(tmp.path(), BEFORE);
    let after = write_file(tmp.path(), "after.txt", AFTER);

    let (status, out) = run_args(&[
        "diff",
        "--baseline",
        baseline.to_str().unwrap(),
        "--from-file",
        after.to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert_eq!(status.unwrap(), Status::LeaksFound);
    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    let leaked = report["leaked"].as_array().unwrap();
    assert_eq!(leaked.len(), 1);
    assert_eq!(leaked[0]["id"], 177);
}

/// Comparing a dump against its own baseline is clean.
#[test]
fn diff_clean() {
    let tmp = TempDir::new().unwrap();
    let baseline = save_baseline(tmp.path(), BEFORE);
    let same = write_file(tmp.path(), "same.txt", BEFORE);

    let (status, out) = run_args(&[
        "diff",
        "--baseline",
        baseline.to_str().unwrap(),
        "--from-file",
        same.to_str().unwrap(),
    ]);
    assert_eq!(status.unwrap(), Status::Ok);
    assert_eq!(out, "no leaked threads (1 snapshot(s))\n");
}

#[test]
fn diff_missing_baseline_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let dump = write_file(tmp.path(), "dump.txt", BEFORE);

    let (status, _) = run_args(&[
        "diff",
        "--baseline",
        tmp.path().join("nope.json").to_str().unwrap(),
        "--from-file",
        dump.to_str().unwrap(),
    ]);
    let err = status.unwrap_err();
    assert!(format!("{err:#}").contains("failed to read baseline"));
}

#[test]
fn diff_rejects_zero_poll_interval() {
    let tmp = TempDir::new().unwrap();
    let baseline = save_baseline(tmp.path(), BEFORE);

    let (status, _) = run_args(&[
        "diff",
        "--baseline",
        baseline.to_str().unwrap(),
        "--poll-ms",
        "0",
    ]);
    assert!(status.is_err());
}

#[test]
fn noise_lists_default_table() {
    let (status, out) = run_args(&["noise"]);
    assert_eq!(status.unwrap(), Status::Ok);
    assert!(out.contains("name: gmain"));
    assert!(out.contains("harness iteration"));
}

/// A live snapshot of this test process records its pid and leaves out the
/// process main thread.
#[cfg(target_os = "linux")]
#[test]
fn snapshot_live_process() {
    let (status, out) = run_args(&["snapshot", "--format", "json"]);
    assert_eq!(status.unwrap(), Status::Ok);
    let file: SnapshotFile = serde_json::from_str(&out).unwrap();
    assert_eq!(file.pid, Some(std::process::id()));
    assert!(!file.tasks.contains(TaskId(u64::from(std::process::id()))));
}
