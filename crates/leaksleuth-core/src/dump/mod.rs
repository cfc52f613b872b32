/// Dump module — the runtime collaborator that yields a full stack dump of
/// every live thread as one block of text.
///
/// Two dumpers ship with the crate:
/// - [`StaticDump`] serves a fixed text (saved dump files, synthetic dumps).
/// - [`ProcDumper`] (Linux) walks `/proc/<pid>/task`.
///
/// Dumpers follow "fill the buffer, report bytes written" semantics: a
/// result equal to the buffer length means the dump may have been truncated.
/// [`read_full_dump`] owns the retry-with-a-bigger-buffer policy.
use crate::error::LeakError;
use tracing::debug;

#[cfg(target_os = "linux")]
pub mod procfs;

#[cfg(target_os = "linux")]
pub use procfs::{current_tid, GuardedTestThread, ProcDumper};

/// Source of full thread dumps.
pub trait StackDumper: Send + Sync {
    /// Write as much of the current dump into `buf` as fits and return the
    /// number of bytes written.
    fn dump(&self, buf: &mut [u8]) -> Result<usize, LeakError>;

    /// Short description for logs and exported snapshots.
    fn describe(&self) -> String;
}

/// A dumper that always yields the same text.
#[derive(Debug, Clone)]
pub struct StaticDump {
    text: String,
}

impl StaticDump {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl StackDumper for StaticDump {
    fn dump(&self, buf: &mut [u8]) -> Result<usize, LeakError> {
        Ok(copy_truncated(self.text.as_bytes(), buf))
    }

    fn describe(&self) -> String {
        "static dump".to_owned()
    }
}

/// Copy `src` into `dst`, truncating to `dst.len()`. Returns bytes copied.
pub(crate) fn copy_truncated(src: &[u8], dst: &mut [u8]) -> usize {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

/// Take a complete dump, doubling the buffer until the dump fits.
///
/// Starts at `initial` bytes and never grows past `limit`. A dump that still
/// fills a `limit`-sized buffer is [`LeakError::BufferExhausted`].
pub fn read_full_dump(
    dumper: &dyn StackDumper,
    initial: usize,
    limit: usize,
) -> Result<String, LeakError> {
    let mut size = initial.clamp(1, limit.max(1));
    loop {
        let mut buf = vec![0u8; size];
        let written = dumper.dump(&mut buf)?;
        if written < size {
            buf.truncate(written);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        if size >= limit {
            return Err(LeakError::BufferExhausted { limit });
        }
        let next = size.saturating_mul(2).min(limit);
        debug!("Dump filled {size} byte buffer, retrying with {next}");
        size = next;
    }
}
