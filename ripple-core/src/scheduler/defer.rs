//! Deferral Primitives
//!
//! The scheduler never decides *when* a deferred flush runs; it hands a task
//! to a [`Deferrer`]. Three implementations are provided:
//!
//! - [`Inline`] runs the task immediately (deterministic tests, debugging);
//! - [`TickQueue`] holds tasks until the host calls
//!   [`TickQueue::run_pending`], like a microtask queue drained at the end of
//!   the current task;
//! - [`TokioDeferrer`] spawns the task onto the current tokio `LocalSet`, so
//!   it runs once the current synchronous code yields back to the runtime.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Schedules a task to run once, after the current synchronous execution.
pub trait Deferrer {
    fn defer(&self, task: Task);
}

/// Runs every task immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Deferrer for Inline {
    fn defer(&self, task: Task) {
        task();
    }
}

/// A host-drained queue of deferred tasks.
#[derive(Default)]
pub struct TickQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TickQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Run queued tasks until the queue is empty, including tasks queued by
    /// the tasks being run. Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // The borrow must end before the task runs: tasks may defer more.
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }
}

impl Deferrer for TickQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Defers tasks onto the current tokio `LocalSet`.
///
/// # Panics
///
/// Deferring a task panics when called outside a `LocalSet` context, as
/// `tokio::task::spawn_local` does.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDeferrer;

impl Deferrer for TokioDeferrer {
    fn defer(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }
}
