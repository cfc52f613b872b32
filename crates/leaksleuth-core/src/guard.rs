/// Test-scoped leak checking.
///
/// A [`LeakGuard`] takes the baseline when it is created and reconciles when
/// it is dropped, so the check runs at the end of the test body however the
/// body exits:
///
/// ```ignore
/// #[test]
/// fn spawns_workers() {
///     let _leaks = leaksleuth_core::check_leaks();
///     // ... test body ...
/// }
/// ```
///
/// Each guard owns its baseline. Nothing is shared between guards, so tests
/// running in parallel keep independent baselines. On Linux, [`check_leaks`]
/// also marks the test thread so that other guards in the same process treat
/// it as noise. Tests that spawn threads without a guard are still seen as
/// new threads by a concurrent guard.
use crate::reconcile::{PanicContext, ReconcileOutcome, Reconciler, TestContext};
use crate::snapshot::Snapshot;

pub struct LeakGuard<C: TestContext = PanicContext> {
    reconciler: Reconciler,
    baseline: Option<Snapshot>,
    ctx: C,
    // Dropped after the final reconcile.
    #[cfg(target_os = "linux")]
    test_thread: Option<crate::dump::GuardedTestThread>,
}

impl<C: TestContext> LeakGuard<C> {
    /// Capture the baseline now.
    pub fn new(reconciler: Reconciler, ctx: C) -> Self {
        let baseline = reconciler.baseline();
        Self {
            reconciler,
            baseline: Some(baseline),
            ctx,
            #[cfg(target_os = "linux")]
            test_thread: None,
        }
    }

    /// Mark the calling thread as a leak-guarded test for the guard's lifetime.
    #[cfg(target_os = "linux")]
    pub fn marking_test_thread(mut self) -> Self {
        self.test_thread = Some(crate::dump::GuardedTestThread::enter());
        self
    }

    pub fn baseline(&self) -> Option<&Snapshot> {
        self.baseline.as_ref()
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    /// Reconcile now instead of at drop time.
    pub fn finish(mut self) -> ReconcileOutcome {
        self.check()
            .unwrap_or(ReconcileOutcome::Clean { attempts: 0 })
    }

    fn check(&mut self) -> Option<ReconcileOutcome> {
        let baseline = self.baseline.take()?;
        Some(self.reconciler.reconcile(&baseline, &self.ctx))
    }
}

impl<C: TestContext> Drop for LeakGuard<C> {
    fn drop(&mut self) {
        self.check();
    }
}

/// Capture a baseline now and return the teardown closure that checks it.
pub fn after_test<C: TestContext>(
    reconciler: Reconciler,
    ctx: C,
) -> impl FnOnce() -> ReconcileOutcome {
    let baseline = reconciler.baseline();
    move || reconciler.reconcile(&baseline, &ctx)
}

#[cfg(target_os = "linux")]
mod platform {
    use super::LeakGuard;
    use crate::config::DetectorConfig;
    use crate::dump::ProcDumper;
    use crate::reconcile::{PanicContext, Reconciler};
    use crate::snapshot::Snapshot;
    use std::sync::Arc;
    use tracing::warn;

    /// Reconciler over `/proc/self/task`, configured from the environment.
    pub fn default_reconciler() -> Reconciler {
        let config = DetectorConfig::from_env().unwrap_or_else(|err| {
            warn!("Ignoring leak detector config: {err}");
            DetectorConfig::default()
        });
        config.reconciler(Arc::new(ProcDumper::current()))
    }

    /// Guard the rest of the current test against leaked threads.
    pub fn check_leaks() -> LeakGuard {
        LeakGuard::new(default_reconciler(), PanicContext).marking_test_thread()
    }

    /// Snapshot of the current process's interesting threads.
    pub fn interesting_tasks() -> Snapshot {
        default_reconciler().snapshotter().capture()
    }
}

#[cfg(target_os = "linux")]
pub use platform::{check_leaks, default_reconciler, interesting_tasks};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::StaticDump;
    use crate::reconcile::RecordingContext;
    use crate::snapshot::Snapshotter;
    use std::sync::Arc;

    fn reconciler(dump: &str) -> Reconciler {
        Reconciler::new(Snapshotter::new(Arc::new(StaticDump::new(dump))))
            .with_window(std::time::Duration::ZERO)
    }

    #[test]
    fn test_guard_takes_baseline_on_creation() {
        let guard = LeakGuard::new(
            reconciler("thread 3 [sleeping]:\nname: worker"),
            RecordingContext::new(),
        );
        assert_eq!(guard.baseline().map(Snapshot::len), Some(1));
        assert_eq!(guard.finish(), ReconcileOutcome::Clean { attempts: 1 });
    }

    #[test]
    fn test_after_test_closure_reconciles() {
        let teardown = after_test(
            reconciler("thread 3 [sleeping]:\nname: worker"),
            RecordingContext::new(),
        );
        assert_eq!(teardown(), ReconcileOutcome::Clean { attempts: 1 });
    }
}
