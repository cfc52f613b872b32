/// Error type for the detector.
///
/// Parse anomalies (malformed records, unparseable identities) never reach
/// this type: they are recovered locally by dropping the record. Leaks are
/// not errors either; they are reported through a `TestContext`.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeakError {
    /// The dump kept filling the largest buffer we are willing to allocate.
    #[error("thread dump does not fit in {limit} bytes; the dumper is misbehaving or the process has an absurd number of threads")]
    BufferExhausted { limit: usize },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid detector config file: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid detector config: {0}")]
    InvalidConfig(String),
}

impl LeakError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
