/// Detector configuration.
///
/// Sources, lowest precedence first:
/// 1. Built-in defaults.
/// 2. A JSON file named by `LEAKSLEUTH_CONFIG`.
/// 3. `LEAKSLEUTH_WINDOW_MS` / `LEAKSLEUTH_POLL_MS`.
use crate::dump::StackDumper;
use crate::error::LeakError;
use crate::noise::{NoisePattern, NoiseTable};
use crate::reconcile::{Reconciler, DEFAULT_POLL_INTERVAL, DEFAULT_WINDOW};
use crate::snapshot::{Snapshotter, DEFAULT_INITIAL_BUFFER, DEFAULT_MAX_BUFFER};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "LEAKSLEUTH_CONFIG";
pub const WINDOW_ENV: &str = "LEAKSLEUTH_WINDOW_MS";
pub const POLL_ENV: &str = "LEAKSLEUTH_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// How long stragglers get to exit after the test body.
    pub window_ms: u64,
    /// Sleep between two snapshots while waiting.
    pub poll_interval_ms: u64,
    pub initial_buffer_bytes: usize,
    pub max_buffer_bytes: usize,
    /// Appended to the default noise table.
    pub extra_noise: Vec<NoisePattern>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            initial_buffer_bytes: DEFAULT_INITIAL_BUFFER,
            max_buffer_bytes: DEFAULT_MAX_BUFFER,
            extra_noise: Vec::new(),
        }
    }
}

impl DetectorConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Default noise table plus `extra_noise`.
    pub fn noise_table(&self) -> NoiseTable {
        let mut table = NoiseTable::default();
        table.extend(self.extra_noise.iter().cloned());
        table
    }

    pub fn from_json_str(json: &str) -> Result<Self, LeakError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, LeakError> {
        let json = std::fs::read_to_string(path).map_err(|e| LeakError::io(path, e))?;
        Self::from_json_str(&json)
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self, LeakError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LeakError> {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => Self::from_json_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Some(raw) = lookup(WINDOW_ENV) {
            config.window_ms = parse_millis(WINDOW_ENV, &raw)?;
        }
        if let Some(raw) = lookup(POLL_ENV) {
            config.poll_interval_ms = parse_millis(POLL_ENV, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LeakError> {
        if self.poll_interval_ms == 0 {
            return Err(LeakError::InvalidConfig(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.initial_buffer_bytes == 0 {
            return Err(LeakError::InvalidConfig(
                "initial_buffer_bytes must be greater than zero".into(),
            ));
        }
        if self.max_buffer_bytes < self.initial_buffer_bytes {
            return Err(LeakError::InvalidConfig(format!(
                "max_buffer_bytes ({}) is smaller than initial_buffer_bytes ({})",
                self.max_buffer_bytes, self.initial_buffer_bytes
            )));
        }
        Ok(())
    }

    pub fn snapshotter(&self, dumper: Arc<dyn StackDumper>) -> Snapshotter {
        Snapshotter::new(dumper)
            .with_noise(self.noise_table())
            .with_buffer_limits(self.initial_buffer_bytes, self.max_buffer_bytes)
    }

    pub fn reconciler(&self, dumper: Arc<dyn StackDumper>) -> Reconciler {
        Reconciler::new(self.snapshotter(dumper))
            .with_window(self.window())
            .with_poll_interval(self.poll_interval())
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<u64, LeakError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| LeakError::InvalidConfig(format!("{key}={raw:?}: {e}")))
}
