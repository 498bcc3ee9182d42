//! Periodic auto-confirmation of aged impacts.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::errors::RippleResult;
use crate::tasks::TaskContext;
use crate::workflow::SweepReport;

/// One sweep with the configured threshold.
pub fn run_autoconfirm(ctx: &TaskContext) -> RippleResult<SweepReport> {
    let threshold = chrono::Duration::hours(ctx.settings.autoconfirm_after_hours);
    ctx.workflow().autoconfirm_sweep(Utc::now(), threshold)
}

#[derive(Default)]
struct Shutdown {
    requested: Mutex<bool>,
    signal: Condvar,
}

/// Background thread running [`run_autoconfirm`] on a fixed interval.
/// Dropping the worker stops it.
pub struct AutoconfirmWorker {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl AutoconfirmWorker {
    /// Sweeps once immediately, then every `interval` until stopped.
    pub fn spawn(ctx: Arc<TaskContext>, interval: Duration) -> RippleResult<Self> {
        let shutdown = Arc::new(Shutdown::default());
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("ripple-autoconfirm".into())
            .spawn(move || loop {
                match run_autoconfirm(&ctx) {
                    Ok(report) => debug!("autoconfirm sweep: {} confirmed", report.confirmed),
                    Err(e) => warn!("autoconfirm sweep failed: {e}"),
                }
                let mut requested = thread_shutdown.requested.lock();
                if !*requested {
                    thread_shutdown.signal.wait_for(&mut requested, interval);
                }
                if *requested {
                    break;
                }
            })?;
        info!("autoconfirm worker started, interval {interval:?}");
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Using the interval from the context's settings.
    pub fn spawn_with_settings(ctx: Arc<TaskContext>) -> RippleResult<Self> {
        let interval = ctx.settings.autoconfirm_interval;
        Self::spawn(ctx, interval)
    }

    /// Wake the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        *self.shutdown.requested.lock() = true;
        self.shutdown.signal.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("autoconfirm worker panicked");
            }
        }
    }
}

impl Drop for AutoconfirmWorker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeImpact, ChangeRequest, ChangeStatus, DetectionMethod, StrictnessMode};
    use crate::tasks::tests::test_context;
    use std::time::Instant;

    fn stale_change(ctx: &TaskContext) -> (ChangeRequest, ChangeImpact) {
        let mut change = ChangeRequest::new("p1", "X", "author", "old");
        change.created_at = Utc::now() - chrono::Duration::hours(30);
        change.status = ChangeStatus::AnalysisComplete;
        ctx.db.insert_change_request(&change).unwrap();
        let impact = ChangeImpact::new(&change.id, "Y", "alice", DetectionMethod::Parser);
        ctx.db.insert_impacts(std::slice::from_ref(&impact)).unwrap();
        (change, impact)
    }

    #[test]
    fn test_run_autoconfirm_uses_settings_threshold() {
        let t = test_context(StrictnessMode::Visibility);
        let (change, impact) = stale_change(&t.ctx);

        let report = run_autoconfirm(&t.ctx).unwrap();
        assert_eq!(report.confirmed, 1);
        assert!(t.ctx.db.get_impact(&impact.id).unwrap().unwrap().auto_confirmed);
        assert_eq!(
            t.ctx.db.get_change_request(&change.id).unwrap().unwrap().status,
            ChangeStatus::PendingReview
        );
        assert_eq!(run_autoconfirm(&t.ctx).unwrap().confirmed, 0);
    }

    #[test]
    fn test_worker_sweeps_and_stops_promptly() {
        let t = test_context(StrictnessMode::Visibility);
        let (_, impact) = stale_change(&t.ctx);

        let worker = AutoconfirmWorker::spawn(Arc::clone(&t.ctx), Duration::from_secs(3600)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !t.ctx.db.get_impact(&impact.id).unwrap().unwrap().acknowledged {
            assert!(Instant::now() < deadline, "worker never swept");
            thread::sleep(Duration::from_millis(20));
        }

        let started = Instant::now();
        worker.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
