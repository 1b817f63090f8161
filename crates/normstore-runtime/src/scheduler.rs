//! Deferred execution of garbage collection.
//!
//! The store never collects inline when a release drops the last
//! retention; it hands a [`GcTask`] to its [`Scheduler`] once the state
//! lock has been released. Tasks made obsolete by a later hold or
//! snapshot do nothing when they eventually run.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

/// A unit of deferred work.
pub type GcTask = Box<dyn FnOnce() + Send + 'static>;

/// Pluggable "run later" primitive.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: GcTask);
}

/// Runs every task as soon as it is scheduled.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: GcTask) {
        task();
    }
}

/// Queues tasks until the host drains them with [`run_pending`].
///
/// [`run_pending`]: ManualScheduler::run_pending
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<GcTask>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run queued tasks in order, including any scheduled while draining.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // The queue lock is not held while a task runs.
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(task) = next else { break };
            task();
            ran += 1;
        }
        if ran > 0 {
            debug!(ran, "drained scheduled tasks");
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, task: GcTask) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs tasks on a tokio runtime's blocking pool.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime of the calling task, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: GcTask) {
        // Collection takes the store's blocking lock.
        drop(self.handle.spawn_blocking(task));
    }
}
