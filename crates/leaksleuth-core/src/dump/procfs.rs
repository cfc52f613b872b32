/// `/proc` thread dumper for Linux.
///
/// Renders one record per entry of `/proc/<pid>/task`:
///
/// ```text
/// thread 4242 [sleeping]:
/// name: leaky-worker
/// wchan: futex_wait_queue
/// [<0>] futex_wait_queue+0x60/0x90
/// ```
///
/// Kernel stacks (`/proc/<pid>/task/<tid>/stack`) are only readable with
/// `CAP_SYS_ADMIN`; without it the record carries the name and wchan rows.
/// Threads that exit while the dump is being rendered are skipped.
///
/// Threads the detector can identify get a `role:` row after the name:
///
/// | Row | Thread |
/// |---|---|
/// | `role: capturing` | the thread rendering this dump |
/// | `role: guarded-test` | a thread inside a [`GuardedTestThread`] scope |
/// | `role: process-main` | the process's main thread (tid == pid) |
///
/// The default noise table matches these rows.
use super::{copy_truncated, StackDumper};
use crate::error::LeakError;
use crate::record::{format_header, TaskId, RECORD_SEPARATOR};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `ESRCH`: the thread is gone but its directory was still open.
const ESRCH: i32 = 3;

/// Tids of threads currently running a leak-guarded test in this process.
static GUARDED_TESTS: Mutex<Vec<u64>> = Mutex::new(Vec::new());

/// Dumps the threads of one process.
#[derive(Debug, Clone)]
pub struct ProcDumper {
    task_dir: PathBuf,
    pid: Option<u32>,
}

impl ProcDumper {
    /// Dump the current process.
    pub fn current() -> Self {
        Self {
            task_dir: PathBuf::from("/proc/self/task"),
            pid: None,
        }
    }

    /// Dump another process by pid.
    pub fn for_pid(pid: u32) -> Self {
        Self {
            task_dir: PathBuf::from(format!("/proc/{pid}/task")),
            pid: Some(pid),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Pid whose threads are dumped.
    fn target_pid(&self) -> u32 {
        self.pid.unwrap_or_else(std::process::id)
    }

    /// Render the whole dump as text.
    pub fn render(&self) -> Result<String, LeakError> {
        let entries =
            fs::read_dir(&self.task_dir).map_err(|e| LeakError::io(&self.task_dir, e))?;

        let mut tids: Vec<u64> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
            .collect();
        tids.sort_unstable();

        let main_tid = u64::from(self.target_pid());
        let own_process = self.target_pid() == std::process::id();
        let capturing = if own_process { current_tid() } else { None };
        let guarded = if own_process {
            GUARDED_TESTS.lock().clone()
        } else {
            Vec::new()
        };

        let records: Vec<String> = tids
            .into_iter()
            .filter_map(|tid| {
                let role = if Some(tid) == capturing {
                    Some(Role::Capturing)
                } else if guarded.contains(&tid) {
                    Some(Role::GuardedTest)
                } else if tid == main_tid {
                    Some(Role::ProcessMain)
                } else {
                    None
                };
                let dir = self.task_dir.join(tid.to_string());
                let record = render_thread(&dir, TaskId(tid), role);
                if record.is_none() {
                    debug!("Thread {tid} exited while dumping");
                }
                record
            })
            .collect();

        Ok(records.join(RECORD_SEPARATOR))
    }
}

impl StackDumper for ProcDumper {
    fn dump(&self, buf: &mut [u8]) -> Result<usize, LeakError> {
        let text = self.render()?;
        Ok(copy_truncated(text.as_bytes(), buf))
    }

    fn describe(&self) -> String {
        self.task_dir.display().to_string()
    }
}

/// What the detector knows about a thread beyond its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Capturing,
    GuardedTest,
    ProcessMain,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::Capturing => "capturing",
            Self::GuardedTest => "guarded-test",
            Self::ProcessMain => "process-main",
        }
    }
}

/// Marks the calling thread as running a leak-guarded test until dropped.
///
/// Dumps of this process render the thread with `role: guarded-test`, so
/// concurrent guards do not report each other's test threads.
#[derive(Debug)]
pub struct GuardedTestThread {
    tid: Option<u64>,
}

impl GuardedTestThread {
    pub fn enter() -> Self {
        let tid = current_tid();
        match tid {
            Some(tid) => GUARDED_TESTS.lock().push(tid),
            None => debug!("Cannot resolve the calling thread's tid; not marking it"),
        }
        Self { tid }
    }
}

impl Drop for GuardedTestThread {
    fn drop(&mut self) {
        let Some(tid) = self.tid else { return };
        let mut guarded = GUARDED_TESTS.lock();
        if let Some(pos) = guarded.iter().position(|&t| t == tid) {
            guarded.swap_remove(pos);
        }
    }
}

/// Kernel tid of the calling thread.
pub fn current_tid() -> Option<u64> {
    fs::read_link("/proc/thread-self")
        .ok()?
        .file_name()?
        .to_str()?
        .parse()
        .ok()
}

/// Read a `/proc` file as text. Invalid UTF-8 is replaced, not rejected:
/// `comm` is cut at 15 bytes regardless of character boundaries.
fn read_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Whether a read failed because the thread no longer exists.
fn vanished(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(ESRCH)
}

/// Read a per-thread file, mapping "thread gone" to `Err(())`.
///
/// Any other failure still yields a record, just without this file's data.
fn read_field(dir: &Path, file: &str) -> Result<Option<String>, ()> {
    match read_lossy(&dir.join(file)) {
        Ok(text) => Ok(Some(text)),
        Err(err) if vanished(&err) => Err(()),
        Err(err) => {
            debug!("Cannot read {}/{file}: {err}", dir.display());
            Ok(None)
        }
    }
}

/// Render one thread's record, or `None` if it vanished mid-read.
fn render_thread(dir: &Path, id: TaskId, role: Option<Role>) -> Option<String> {
    let status = read_field(dir, "status").ok()?;
    let state = status
        .as_deref()
        .and_then(status_state)
        .unwrap_or("unknown");
    let name = read_field(dir, "comm").ok()?.unwrap_or_default();

    let mut record = format_header(id, state);
    record.push_str("\nname: ");
    record.push_str(name.trim_end());
    if let Some(role) = role {
        record.push_str("\nrole: ");
        record.push_str(role.as_str());
    }

    if let Ok(wchan) = read_lossy(&dir.join("wchan")) {
        let wchan = wchan.trim();
        if !wchan.is_empty() && wchan != "0" {
            record.push_str("\nwchan: ");
            record.push_str(wchan);
        }
    }

    // Needs CAP_SYS_ADMIN; silently absent otherwise.
    if let Ok(stack) = read_lossy(&dir.join("stack")) {
        for line in stack.lines().map(str::trim).filter(|l| !l.is_empty()) {
            record.push('\n');
            record.push_str(line);
        }
    }

    Some(record)
}

/// Pull the long state name out of a `status` file, e.g.
/// `State:\tS (sleeping)` gives `sleeping`.
fn status_state(status: &str) -> Option<&str> {
    let line = status.lines().find_map(|l| l.strip_prefix("State:"))?;
    let line = line.trim();
    match (line.find('('), line.rfind(')')) {
        (Some(open), Some(close)) if close > open => Some(&line[open + 1..close]),
        _ => line.split_whitespace().next(),
    }
}
