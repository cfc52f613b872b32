/// Stack-trace records — splitting a raw dump into per-thread records and
/// extracting each record's identity.
///
/// A dump is a sequence of records separated by a blank line. Each record
/// starts with a header line of the form
///
/// ```text
/// thread 4242 [sleeping]:
/// ```
///
/// followed by one or more frame lines.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal prefix every record header starts with.
pub const HEADER_PREFIX: &str = "thread ";

/// Separator between two records in a raw dump.
pub const RECORD_SEPARATOR: &str = "\n\n";

/// Identity of one thread at one point in time.
///
/// Identities are only ever compared by exact equality. The kernel may
/// recycle a tid once the original thread has exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One record borrowed from a raw dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord<'a> {
    /// The header line (`thread <id> [<state>]:`).
    pub header: &'a str,
    /// Frame text, trimmed. May be empty.
    pub frames: &'a str,
    /// The full record text as it appeared in the dump.
    pub text: &'a str,
}

impl RawRecord<'_> {
    pub fn task_id(&self) -> Option<TaskId> {
        parse_task_id(self.header)
    }

    pub fn state(&self) -> Option<&str> {
        parse_state(self.header)
    }
}

/// Extract the identity from a record header.
///
/// Returns `None` when the header does not start with [`HEADER_PREFIX`],
/// when no space follows the number, or when the number does not parse.
pub fn parse_task_id(header: &str) -> Option<TaskId> {
    let rest = header.strip_prefix(HEADER_PREFIX)?;
    let end = rest.find(' ')?;
    rest[..end].parse::<u64>().ok().map(TaskId)
}

/// Extract the bracketed state token from a record header, e.g. `sleeping`.
pub fn parse_state(header: &str) -> Option<&str> {
    let open = header.find('[')?;
    let close = header[open..].find(']')? + open;
    Some(&header[open + 1..close])
}

/// Render a record header.
pub fn format_header(id: TaskId, state: &str) -> String {
    format!("{HEADER_PREFIX}{id} [{state}]:")
}

/// Split a raw dump into records.
///
/// Records end at a blank line; `\r\n` line endings are accepted. Blocks
/// without at least one line after the header are malformed and are skipped
/// here; the caller never sees them.
pub fn split_records(dump: &str) -> impl Iterator<Item = RawRecord<'_>> {
    blocks(dump).filter_map(|block| {
        let text = block.trim_matches(|c| c == '\n' || c == '\r');
        let (header, frames) = text.split_once('\n')?;
        Some(RawRecord {
            header: header.trim_end(),
            frames: frames.trim(),
            text,
        })
    })
}

/// Non-empty runs of lines between blank lines.
fn blocks(dump: &str) -> impl Iterator<Item = &str> {
    let mut rest = dump;
    std::iter::from_fn(move || loop {
        if rest.is_empty() {
            return None;
        }
        let mut end = 0;
        let mut next = rest.len();
        for line in rest.split_inclusive('\n') {
            if is_blank_line(line) {
                next = end + line.len();
                break;
            }
            end += line.len();
        }
        let block = &rest[..end];
        rest = &rest[next..];
        if !block.is_empty() {
            return Some(block);
        }
    })
}

fn is_blank_line(line: &str) -> bool {
    line.trim_end_matches(|c| c == '\n' || c == '\r').is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_id() {
        assert_eq!(parse_task_id("thread 17 [running]:"), Some(TaskId(17)));
        assert_eq!(
            parse_task_id("thread 123456789 [sleeping]:"),
            Some(TaskId(123_456_789))
        );
    }

    #[test]
    fn test_parse_task_id_rejects_garbage() {
        assert_eq!(parse_task_id("goroutine 17 [running]:"), None);
        assert_eq!(parse_task_id("thread abc [running]:"), None);
        assert_eq!(parse_task_id("thread 17"), None);
        assert_eq!(parse_task_id(""), None);
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("thread 17 [disk sleep]:"), Some("disk sleep"));
        assert_eq!(parse_state("thread 17:"), None);
    }

    #[test]
    fn test_format_header_round_trips_through_parser() {
        let header = format_header(TaskId(99), "sleeping");
        assert_eq!(header, "thread 99 [sleeping]:");
        assert_eq!(parse_task_id(&header), Some(TaskId(99)));
    }

    #[test]
    fn test_split_records_skips_headers_without_frames() {
        let dump = "thread 1 [running]:\nname: main\n\nthread 2 [sleeping]:\n\nthread 3 [sleeping]:\nname: worker\n";
        let records: Vec<_> = split_records(dump).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].task_id(), Some(TaskId(1)));
        assert_eq!(records[0].frames, "name: main");
        assert_eq!(records[1].task_id(), Some(TaskId(3)));
        assert_eq!(records[1].text, "thread 3 [sleeping]:\nname: worker");
    }

    #[test]
    fn test_split_records_keeps_whitespace_only_frames_as_empty() {
        let dump = "thread 5 [running]:\n   \t";
        let records: Vec<_> = split_records(dump).collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].frames.is_empty());
    }

    #[test]
    fn test_split_records_accepts_crlf() {
        let dump = "thread 1 [running]:\r\nname: main\r\n\r\nthread 2 [sleeping]:\r\nname: worker\r\n";
        let records: Vec<_> = split_records(dump).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].task_id(), Some(TaskId(1)));
        assert_eq!(records[0].frames, "name: main");
        assert_eq!(records[1].task_id(), Some(TaskId(2)));
        assert_eq!(records[1].state(), Some("sleeping"));
        assert_eq!(records[1].frames, "name: worker");
    }

    #[test]
    fn test_split_records_tolerates_runs_of_blank_lines() {
        let dump = "\n\nthread 1 [running]:\nname: main\n\n\n\nthread 2 [sleeping]:\nname: worker";
        let ids: Vec<_> = split_records(dump).filter_map(|r| r.task_id()).collect();
        assert_eq!(ids, vec![TaskId(1), TaskId(2)]);
    }
}
