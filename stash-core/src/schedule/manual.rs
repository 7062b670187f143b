//! Manually driven scheduler.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::Context;

use futures_util::task::{waker_ref, ArcWake};
use parking_lot::Mutex;

use super::{Flush, Schedule, Task};

type Queue = Mutex<VecDeque<Job>>;

enum Job {
    Flush(Flush),
    Poll(Arc<TaskCell>),
}

/// A spawned task and its place in the queue.
struct TaskCell {
    future: Mutex<Option<Task>>,
    queue: Weak<Queue>,
    /// Set while the cell sits in the queue, so repeated wakes enqueue once.
    queued: AtomicBool,
}

impl ArcWake for TaskCell {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(queue) = arc_self.queue.upgrade() {
            queue.lock().push_back(Job::Poll(Arc::clone(arc_self)));
        }
    }
}

/// Scheduler that runs nothing until [`run_pending`](Self::run_pending) is called.
///
/// Tasks are polled on the calling thread. A task that is woken while
/// `run_pending` is draining is polled again in the same call.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<Queue>,
}

impl ManualScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drain the queue, running flushes and polling tasks in FIFO order.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;

        loop {
            // The guard must be released before the job runs; jobs enqueue.
            let job = self.queue.lock().pop_front();
            let Some(job) = job else { break };

            match job {
                Job::Flush(flush) => flush(),
                Job::Poll(cell) => {
                    cell.queued.store(false, Ordering::Release);
                    let mut slot = cell.future.lock();
                    if let Some(mut future) = slot.take() {
                        let waker = waker_ref(&cell);
                        let mut cx = Context::from_waker(&waker);
                        if future.as_mut().poll(&mut cx).is_pending() {
                            *slot = Some(future);
                        }
                    }
                }
            }
            ran += 1;
        }

        ran
    }
}

impl Schedule for ManualScheduler {
    fn schedule_flush(&self, flush: Flush) {
        self.queue.lock().push_back(Job::Flush(flush));
    }

    fn spawn(&self, task: Task) {
        let cell = Arc::new(TaskCell {
            future: Mutex::new(Some(task)),
            queue: Arc::downgrade(&self.queue),
            queued: AtomicBool::new(true),
        });
        self.queue.lock().push_back(Job::Poll(cell));
    }

    fn run_pending(&self) -> usize {
        ManualScheduler::run_pending(self)
    }
}
