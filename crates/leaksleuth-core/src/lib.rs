/// LeakSleuth Core — thread snapshots, noise filtering, and leak reconciliation.
///
/// This crate contains all detection logic with zero CLI dependencies.
/// It is designed to be used directly from test code, or behind a frontend.
///
/// # Modules
///
/// - [`record`] — Record splitting and thread-identity parsing.
/// - [`noise`] — The configurable table of harness/runtime noise patterns.
/// - [`dump`] — Full thread dumps (`/proc` on Linux, static text elsewhere).
/// - [`snapshot`] — Filtered identity → record snapshots.
/// - [`reconcile`] — Baseline diffing with a bounded straggler window.
/// - [`guard`] — Drop guard and teardown closure for tests.
/// - [`config`] — Detector settings from defaults, JSON and environment.
pub mod config;
pub mod dump;
pub mod error;
pub mod guard;
pub mod noise;
pub mod reconcile;
pub mod record;
pub mod snapshot;

pub use config::DetectorConfig;
pub use error::LeakError;
pub use guard::{after_test, LeakGuard};
#[cfg(target_os = "linux")]
pub use guard::{check_leaks, default_reconciler, interesting_tasks};
pub use reconcile::{LeakReport, ReconcileOutcome, Reconciler, RecordingContext, TestContext};
pub use record::TaskId;
pub use snapshot::{Snapshot, Snapshotter};
