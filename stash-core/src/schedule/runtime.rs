//! Tokio-backed scheduler.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{trace, warn};

use super::{Flush, ManualScheduler, Schedule, Task};

/// Scheduler that runs store work on the tokio runtime current at request
/// time.
///
/// Flushes are only spawned on a current-thread runtime. There the flush
/// cannot start until the requesting task yields, so a synchronous burst
/// always ends in one broadcast. A multi-thread runtime gives no such
/// guarantee: an idle worker may steal the flush while the burst is still
/// running. On those runtimes, and outside any runtime, flushes are parked
/// in a [`ManualScheduler`] queue and run when [`Schedule::run_pending`] is
/// called.
///
/// Background tasks have no burst to respect, so they are spawned on any
/// runtime flavor.
#[derive(Default)]
pub struct TokioScheduler {
    fallback: ManualScheduler,
    warned_missing: AtomicBool,
    warned_multi_thread: AtomicBool,
}

impl TokioScheduler {
    /// Create a scheduler bound to whichever runtime is current when work arrives.
    pub fn new() -> Self {
        Self::default()
    }

    fn runtime(&self) -> Option<Handle> {
        match Handle::try_current() {
            Ok(handle) => Some(handle),
            Err(_) => {
                if !self.warned_missing.swap(true, Ordering::Relaxed) {
                    warn!("no tokio runtime available; store work is parked until run_pending");
                } else {
                    trace!("no tokio runtime available; parking store work");
                }
                None
            }
        }
    }

    /// A handle that may run flushes, if the current runtime keeps bursts intact.
    fn flush_runtime(&self) -> Option<Handle> {
        let handle = self.runtime()?;
        match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Some(handle),
            flavor => {
                if !self.warned_multi_thread.swap(true, Ordering::Relaxed) {
                    warn!(
                        ?flavor,
                        "multi-thread tokio runtime cannot keep a burst to one flush; \
                         notifications are parked until run_pending"
                    );
                } else {
                    trace!(?flavor, "parking flush on multi-thread runtime");
                }
                None
            }
        }
    }
}

impl Schedule for TokioScheduler {
    fn schedule_flush(&self, flush: Flush) {
        match self.flush_runtime() {
            Some(handle) => {
                handle.spawn(async move { flush() });
            }
            None => self.fallback.schedule_flush(flush),
        }
    }

    fn spawn(&self, task: Task) {
        match self.runtime() {
            Some(handle) => {
                handle.spawn(task);
            }
            None => self.fallback.spawn(task),
        }
    }

    fn run_pending(&self) -> usize {
        self.fallback.run_pending()
    }
}
