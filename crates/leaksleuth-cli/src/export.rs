/// Snapshot and report serialisation — JSON, CSV and plain text.
///
/// The text form of a snapshot is itself a valid dump (records separated by
/// blank lines), so it can be fed back through `--from-file`.
use anyhow::Context;
use chrono::{DateTime, Utc};
use leaksleuth_core::noise::NoiseTable;
use leaksleuth_core::record::{parse_state, RECORD_SEPARATOR};
use leaksleuth_core::{LeakReport, Snapshot};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// On-disk snapshot written by `snapshot --format json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub source: String,
    pub tasks: Snapshot,
}

impl SnapshotFile {
    pub fn new(tasks: Snapshot, source: String, pid: Option<u32>) -> Self {
        Self {
            captured_at: Utc::now(),
            pid,
            source,
            tasks,
        }
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read baseline {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("{} is not a leaksleuth snapshot", path.display()))
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: u64,
    state: &'a str,
    record: &'a str,
}

pub fn write_snapshot_text(out: &mut dyn Write, snapshot: &Snapshot) -> anyhow::Result<()> {
    let records: Vec<&str> = snapshot.iter().map(|(_, record)| record).collect();
    if !records.is_empty() {
        writeln!(out, "{}", records.join(RECORD_SEPARATOR))?;
    }
    Ok(())
}

pub fn write_snapshot_json(out: &mut dyn Write, file: &SnapshotFile) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, file)?;
    writeln!(out)?;
    Ok(())
}

pub fn write_snapshot_csv(out: &mut dyn Write, snapshot: &Snapshot) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for (id, record) in snapshot.iter() {
        let header = record.lines().next().unwrap_or_default();
        writer.serialize(CsvRow {
            id: id.0,
            state: parse_state(header).unwrap_or_default(),
            record,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_report_text(out: &mut dyn Write, report: &LeakReport) -> anyhow::Result<()> {
    write!(out, "{report}")?;
    writeln!(out, "{} leaked thread(s)", report.len())?;
    Ok(())
}

pub fn write_report_json(out: &mut dyn Write, report: &LeakReport) -> anyhow::Result<()> {
    let leaked: Vec<serde_json::Value> = report
        .tasks()
        .iter()
        .map(|task| serde_json::json!({ "id": task.id, "record": task.record }))
        .collect();
    serde_json::to_writer_pretty(&mut *out, &serde_json::json!({ "leaked": leaked }))?;
    writeln!(out)?;
    Ok(())
}

pub fn write_noise_text(out: &mut dyn Write, table: &NoiseTable) -> anyhow::Result<()> {
    for pattern in table.patterns() {
        writeln!(
            out,
            "{:<18} {:<9} {}",
            pattern.category.label(),
            format!("{:?}", pattern.matcher).to_lowercase(),
            pattern.needle
        )?;
    }
    Ok(())
}

pub fn write_noise_json(out: &mut dyn Write, table: &NoiseTable) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, table)?;
    writeln!(out)?;
    Ok(())
}
