/// Snapshotter — captures the set of interesting threads as a mapping from
/// identity to record text.
///
/// The pipeline is: full dump, split on blank lines, drop malformed records,
/// drop noise, key the rest by identity. It only reads process state, so any
/// number of tests may capture concurrently.
use crate::dump::{read_full_dump, StackDumper};
use crate::error::LeakError;
use crate::noise::{NoiseTable, NoiseVerdict};
use crate::record::{split_records, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Initial dump buffer size.
pub const DEFAULT_INITIAL_BUFFER: usize = 2 << 20;

/// Largest dump buffer before giving up.
pub const DEFAULT_MAX_BUFFER: usize = 64 << 20;

/// Interesting threads at one point in time.
///
/// Never mutated after construction; owns no handle to the threads it
/// describes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    tasks: BTreeMap<TaskId, String>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&str> {
        self.tasks.get(&id).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    /// Records in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &str)> {
        self.tasks.iter().map(|(id, text)| (*id, text.as_str()))
    }
}

impl FromIterator<(TaskId, String)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (TaskId, String)>>(iter: I) -> Self {
        Self {
            tasks: iter.into_iter().collect(),
        }
    }
}

/// Filter a raw dump down to its interesting records.
///
/// Records whose identity cannot be parsed are dropped with a warning; they
/// would be dropped from every later snapshot too, so they can never show up
/// as a leak.
pub fn parse_snapshot(dump: &str, noise: &NoiseTable) -> Snapshot {
    let mut tasks = BTreeMap::new();

    for record in split_records(dump) {
        match noise.classify(record.frames) {
            NoiseVerdict::Interesting => {}
            verdict => {
                trace!("Skipping {:?}: {:?}", record.header, verdict);
                continue;
            }
        }

        let Some(id) = record.task_id() else {
            warn!("Dropping thread record with unparseable header {:?}", record.header);
            continue;
        };
        tasks.insert(id, record.text.to_owned());
    }

    Snapshot { tasks }
}

/// Captures snapshots from a [`StackDumper`].
#[derive(Clone)]
pub struct Snapshotter {
    dumper: Arc<dyn StackDumper>,
    noise: NoiseTable,
    initial_buffer: usize,
    max_buffer: usize,
}

impl Snapshotter {
    pub fn new(dumper: Arc<dyn StackDumper>) -> Self {
        Self {
            dumper,
            noise: NoiseTable::default(),
            initial_buffer: DEFAULT_INITIAL_BUFFER,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    pub fn with_noise(mut self, noise: NoiseTable) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_buffer_limits(mut self, initial: usize, max: usize) -> Self {
        self.initial_buffer = initial;
        self.max_buffer = max;
        self
    }

    pub fn noise(&self) -> &NoiseTable {
        &self.noise
    }

    pub fn dumper(&self) -> &dyn StackDumper {
        self.dumper.as_ref()
    }

    /// Take the raw, unfiltered dump.
    pub fn raw_dump(&self) -> Result<String, LeakError> {
        read_full_dump(self.dumper.as_ref(), self.initial_buffer, self.max_buffer)
    }

    pub fn try_capture(&self) -> Result<Snapshot, LeakError> {
        let dump = self.raw_dump()?;
        let snapshot = parse_snapshot(&dump, &self.noise);
        debug!(
            "Captured {} interesting threads from {}",
            snapshot.len(),
            self.dumper.describe()
        );
        Ok(snapshot)
    }

    /// Capture a snapshot, panicking if the dump cannot be taken.
    ///
    /// A failed dump means the dumper broke its contract; there is no
    /// meaningful leak verdict to fall back on.
    pub fn capture(&self) -> Snapshot {
        match self.try_capture() {
            Ok(snapshot) => snapshot,
            Err(err) => panic!("leak detector could not capture a thread dump: {err}"),
        }
    }
}

impl std::fmt::Debug for Snapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshotter")
            .field("dumper", &self.dumper.describe())
            .field("noise_patterns", &self.noise.len())
            .field("initial_buffer", &self.initial_buffer)
            .field("max_buffer", &self.max_buffer)
            .finish()
    }
}
