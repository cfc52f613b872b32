/// Reconciler — compares fresh snapshots against a baseline until the extra
/// threads are gone or the window closes.
///
/// # Policy
///
/// 1. Unwinding in progress: return at once, the panic keeps propagating.
/// 2. Test already failed: return at once, no extra noise on top of the
///    real failure.
/// 3. Otherwise poll: snapshot, diff, sleep `poll_interval`, repeat until the
///    diff is empty (success) or `window` has elapsed (report every
///    surviving record through the [`TestContext`]).
use crate::error::LeakError;
use crate::record::TaskId;
use crate::snapshot::{Snapshot, Snapshotter};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default time stragglers get to exit.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default sleep between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One thread present now but absent from the baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedTask {
    pub id: TaskId,
    pub record: String,
}

/// Threads present in a later snapshot and absent (by identity) from the
/// baseline, sorted by record text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    leaked: Vec<LeakedTask>,
}

impl LeakReport {
    pub fn is_empty(&self) -> bool {
        self.leaked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.leaked.len()
    }

    pub fn tasks(&self) -> &[LeakedTask] {
        &self.leaked
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.leaked.iter().map(|t| t.id)
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for task in &self.leaked {
            write!(f, "Leaked thread: {}\n\n", task.record)?;
        }
        Ok(())
    }
}

/// Every record of `current` whose identity is missing from `baseline`.
pub fn diff(baseline: &Snapshot, current: &Snapshot) -> LeakReport {
    let mut leaked: Vec<LeakedTask> = current
        .iter()
        .filter(|(id, _)| !baseline.contains(*id))
        .map(|(id, record)| LeakedTask {
            id,
            record: record.to_owned(),
        })
        .collect();
    leaked.sort_by(|a, b| a.record.cmp(&b.record));
    LeakReport { leaked }
}

/// The test the reconciler runs on behalf of.
///
/// The reconciler only reads [`failed`](Self::failed) and only writes
/// through [`report_failure`](Self::report_failure).
pub trait TestContext {
    fn failed(&self) -> bool;
    fn report_failure(&self, message: &str);
}

/// Plain Rust tests: a failed test is a panicking thread, and reporting a
/// failure means panicking.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicContext;

impl TestContext for PanicContext {
    fn failed(&self) -> bool {
        std::thread::panicking()
    }

    fn report_failure(&self, message: &str) {
        panic!("{message}");
    }
}

/// Collects failure messages instead of panicking.
#[derive(Debug, Default)]
pub struct RecordingContext {
    failed: AtomicBool,
    failures: Mutex<Vec<String>>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the test as already failed for unrelated reasons.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }
}

impl TestContext for RecordingContext {
    fn failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed) || !self.failures.lock().is_empty()
    }

    fn report_failure(&self, message: &str) {
        self.failures.lock().push(message.to_owned());
    }
}

/// Why a reconcile returned without checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unwinding,
    AlreadyFailed,
}

/// Result of one reconcile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No extra threads, after `attempts` snapshots.
    Clean { attempts: u32 },
    Skipped(SkipReason),
    /// Extra threads survived the window and were reported.
    Leaked(LeakReport),
}

impl ReconcileOutcome {
    pub fn is_leak(&self) -> bool {
        matches!(self, Self::Leaked(_))
    }
}

/// Snapshotter plus polling policy.
#[derive(Debug, Clone)]
pub struct Reconciler {
    snapshotter: Snapshotter,
    window: Duration,
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(snapshotter: Snapshotter) -> Self {
        Self {
            snapshotter,
            window: DEFAULT_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn snapshotter(&self) -> &Snapshotter {
        &self.snapshotter
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Take the baseline for a test.
    pub fn baseline(&self) -> Snapshot {
        self.snapshotter.capture()
    }

    /// Check `baseline` against fresh snapshots, reporting through `ctx`.
    ///
    /// Panics if a snapshot cannot be captured.
    pub fn reconcile<C: TestContext + ?Sized>(
        &self,
        baseline: &Snapshot,
        ctx: &C,
    ) -> ReconcileOutcome {
        match self.try_reconcile(baseline, ctx) {
            Ok(outcome) => outcome,
            Err(err) => panic!("leak detector could not capture a thread dump: {err}"),
        }
    }

    /// [`reconcile`](Self::reconcile), with capture failures returned.
    pub fn try_reconcile<C: TestContext + ?Sized>(
        &self,
        baseline: &Snapshot,
        ctx: &C,
    ) -> Result<ReconcileOutcome, LeakError> {
        if std::thread::panicking() {
            trace!("Skipping leak check: unwinding");
            return Ok(ReconcileOutcome::Skipped(SkipReason::Unwinding));
        }
        if ctx.failed() {
            trace!("Skipping leak check: test already failed");
            return Ok(ReconcileOutcome::Skipped(SkipReason::AlreadyFailed));
        }

        let deadline = Instant::now() + self.window;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let report = diff(baseline, &self.snapshotter.try_capture()?);
            if report.is_empty() {
                debug!("No leaked threads after {attempts} attempt(s)");
                return Ok(ReconcileOutcome::Clean { attempts });
            }
            // A zero window checks exactly once.
            if !self.window.is_zero() && within_deadline(Instant::now(), deadline) {
                debug!(
                    "{} extra thread(s) still running, retrying in {:?}",
                    report.len(),
                    self.poll_interval
                );
                std::thread::sleep(self.poll_interval);
                continue;
            }

            warn!(
                "{} thread(s) still running {:?} after the test finished",
                report.len(),
                self.window
            );
            ctx.report_failure(&report.to_string());
            return Ok(ReconcileOutcome::Leaked(report));
        }
    }
}

/// The deadline itself still counts as inside the window.
fn within_deadline(now: Instant, deadline: Instant) -> bool {
    now <= deadline
}
