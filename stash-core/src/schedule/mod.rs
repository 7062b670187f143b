//! Notification Scheduling
//!
//! Store mutations never notify subscribers directly. Instead they request a
//! flush, and the scheduler runs that flush at the next cooperative
//! scheduling point. Every mutation made before that point is coalesced
//! into a single broadcast.
//!
//! # Schedulers
//!
//! - [`TokioScheduler`] spawns the flush as a task on the ambient
//!   current-thread tokio runtime, so it runs as soon as the current task
//!   yields. This is the closest Rust equivalent of a microtask queue. On a
//!   multi-thread runtime another worker could run the flush mid-burst, so
//!   flushes are parked there and delivered by `run_pending`.
//! - [`ManualScheduler`] parks flushes and tasks in a queue until
//!   [`ManualScheduler::run_pending`] drains it. Hosts that drive their own
//!   event loop use it, and so do deterministic tests.
//!
//! The same scheduler also runs the store's background work: awaiting
//! deferred writes and pumping attached streams.

mod manual;
mod runtime;

use futures_util::future::BoxFuture;

pub use manual::ManualScheduler;
pub use runtime::TokioScheduler;

/// A pending notification flush.
pub type Flush = Box<dyn FnOnce() + Send>;

/// Background work spawned by the store.
pub type Task = BoxFuture<'static, ()>;

/// Defers store work to a later scheduling point.
pub trait Schedule: Send + Sync {
    /// Queue a flush to run after the current synchronous burst.
    fn schedule_flush(&self, flush: Flush);

    /// Run a background task to completion.
    fn spawn(&self, task: Task);

    /// Run queued work synchronously, returning how many jobs ran.
    ///
    /// Schedulers backed by a real executor have nothing to drain.
    fn run_pending(&self) -> usize {
        0
    }
}
