//! Scheduler Queue
//!
//! The scheduler batches invalidations into one flush. Watchers enqueue
//! themselves when a source changes; the first enqueue of a burst asks the
//! deferrer for a flush, and the flush runs every queued job exactly once in
//! id order.
//!
//! # Algorithm
//!
//! 1. Enqueue is deduplicated by watcher id: one pending slot per watcher,
//!    however many times it was invalidated.
//! 2. A flush sorts the queue by id. Ids grow in construction order, so
//!    parents run before children and a component's secondary watchers run
//!    before its primary one.
//! 3. Jobs enqueued while the flush is running are spliced into the pending
//!    suffix at their sorted position, and the loop re-reads the queue
//!    length on every step so they run in the same pass.
//! 4. A job that keeps re-queuing itself is counted; past the configured
//!    threshold the pass is abandoned with a diagnostic.
//! 5. All state is reset *before* post-flush hooks run, so mutations made
//!    by a hook start a fresh flush cycle.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use parking_lot::RwLock;

use super::defer::{Deferrer, TickQueue};
use super::owner::{HookDispatcher, LifecycleHook, NoopHooks, Owner};
use crate::config::SchedulerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, ErrorReporter, LoopSource, TracingSink};
use crate::error::WatchError;
use crate::reactive::WatcherId;

/// Start time of the most recent flush on any scheduler in the process.
static FLUSH_TIMESTAMP: RwLock<Option<Instant>> = RwLock::new(None);

/// The start time of the most recent flush, process-wide.
///
/// Listeners recorded during a flush compare against this reading instead
/// of querying the clock for every event.
pub fn current_flush_timestamp() -> Option<Instant> {
    *FLUSH_TIMESTAMP.read()
}

/// A unit of work the scheduler can run.
pub trait ScheduledJob {
    /// Queue position and dedup key.
    fn id(&self) -> WatcherId;

    /// Human-readable expression, used in diagnostics.
    fn expression(&self) -> &str;

    /// Whether the job runs user-supplied code.
    fn is_user(&self) -> bool;

    /// The owner the job belongs to, if any.
    fn owner(&self) -> Option<Rc<Owner>>;

    /// Hook invoked right before the job runs in a flush.
    fn before(&self);

    /// Run the job.
    fn run(&self) -> Result<(), WatchError>;

    /// Permanently deactivate the job.
    fn teardown(&self);
}

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushSummary {
    /// Number of queue slots visited (including re-runs).
    pub ran: usize,
    /// The job whose runaway loop aborted the pass, if any.
    pub aborted_by: Option<WatcherId>,
}

#[derive(Default)]
struct QueueState {
    queue: Vec<Rc<dyn ScheduledJob>>,
    has: HashSet<WatcherId>,
    index: usize,
    circular: HashMap<WatcherId, u32>,
    activated: Vec<Rc<Owner>>,
}

/// Batches watcher runs into ordered flushes.
pub struct Scheduler {
    config: SchedulerConfig,
    deferrer: Rc<dyn Deferrer>,
    diagnostics: Rc<dyn DiagnosticSink>,
    errors: Rc<dyn ErrorReporter>,
    hooks: Rc<dyn HookDispatcher>,
    weak_self: Weak<Scheduler>,
    state: RefCell<QueueState>,
    flushing: Cell<bool>,
    waiting: Cell<bool>,
    flush_started_at: Cell<Option<Instant>>,
}

impl Scheduler {
    /// Create a scheduler with default collaborators.
    pub fn new(config: SchedulerConfig) -> Rc<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Rc<dyn DiagnosticSink> {
        &self.diagnostics
    }

    pub fn errors(&self) -> &Rc<dyn ErrorReporter> {
        &self.errors
    }

    /// Whether the run loop is currently iterating.
    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    /// Whether a flush has been scheduled (or is running) and not finished.
    pub fn is_waiting(&self) -> bool {
        self.waiting.get()
    }

    /// Start time of this scheduler's most recent flush.
    pub fn flush_timestamp(&self) -> Option<Instant> {
        self.flush_started_at.get()
    }

    /// Check whether the job with `id` holds a pending slot.
    pub fn is_queued(&self, id: WatcherId) -> bool {
        self.state.borrow().has.contains(&id)
    }

    /// Ids in queue order, including already-run slots of a flush in
    /// progress.
    pub fn queued_ids(&self) -> Vec<WatcherId> {
        self.state.borrow().queue.iter().map(|job| job.id()).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// How often `id` has been re-queued during the current flush.
    pub fn circular_count(&self, id: WatcherId) -> u32 {
        self.state.borrow().circular.get(&id).copied().unwrap_or(0)
    }

    /// Give `job` a pending slot, scheduling a flush if none is pending.
    ///
    /// In sync flush mode the flush runs before this returns, and a trusted
    /// job's failure is returned here.
    pub fn queue_watcher(&self, job: Rc<dyn ScheduledJob>) -> Result<(), WatchError> {
        let id = job.id();
        {
            let mut state = self.state.borrow_mut();
            if !state.has.insert(id) {
                return Ok(());
            }

            if self.flushing.get() {
                // Keep the pending suffix sorted; never insert at or before
                // the slot that is running.
                let mut at = state.queue.len();
                while at > state.index + 1 && state.queue[at - 1].id() > id {
                    at -= 1;
                }
                state.queue.insert(at, job);
            } else {
                state.queue.push(job);
            }
        }
        tracing::trace!(watcher = %id, flushing = self.flushing.get(), "watcher queued");

        if !self.waiting.replace(true) {
            if self.config.is_sync() {
                self.flush()?;
            } else {
                self.schedule_flush();
            }
        }
        Ok(())
    }

    /// Queue an owner for the `activated` hook at the end of the next flush.
    ///
    /// The owner is marked active immediately, so reads during the same
    /// burst already see it as active.
    pub fn queue_activated(&self, owner: &Rc<Owner>) {
        owner.set_inactive(false);
        self.state.borrow_mut().activated.push(Rc::clone(owner));
    }

    fn schedule_flush(&self) {
        let weak = self.weak_self.clone();
        self.deferrer.defer(Box::new(move || {
            if let Some(scheduler) = weak.upgrade() {
                if let Err(err) = scheduler.flush() {
                    scheduler.errors.report(&err, None);
                }
            }
        }));
    }

    /// Run every queued job, then the post-flush hooks.
    ///
    /// A trusted job's failure aborts the pass: the state is still reset so
    /// later mutations can schedule a new flush, the hooks of the failed pass
    /// are skipped, and the error is returned.
    pub fn flush(&self) -> Result<FlushSummary, WatchError> {
        if self.flushing.get() {
            tracing::trace!("flush requested while flushing; ignored");
            return Ok(FlushSummary::default());
        }

        let started = Instant::now();
        self.flush_started_at.set(Some(started));
        *FLUSH_TIMESTAMP.write() = Some(started);
        self.flushing.set(true);

        let queued = {
            let mut state = self.state.borrow_mut();
            state.queue.sort_by_key(|job| job.id());
            state.queue.len()
        };
        tracing::debug!(queued, "flush started");

        let outcome = self.run_queue();

        let (activated, updated) = {
            let mut state = self.state.borrow_mut();
            (std::mem::take(&mut state.activated), state.queue.clone())
        };
        self.reset();

        let summary = outcome?;
        self.call_activated_hooks(&activated);
        self.call_updated_hooks(&updated);

        tracing::debug!(
            ran = summary.ran,
            aborted = summary.aborted_by.is_some(),
            "flush finished"
        );
        Ok(summary)
    }

    fn run_queue(&self) -> Result<FlushSummary, WatchError> {
        let mut summary = FlushSummary::default();
        let mut index = 0;

        loop {
            let job = {
                let mut state = self.state.borrow_mut();
                state.index = index;
                match state.queue.get(index) {
                    Some(job) => Rc::clone(job),
                    None => break,
                }
            };

            job.before();
            let id = job.id();
            self.state.borrow_mut().has.remove(&id);
            job.run()?;
            summary.ran += 1;

            let runaway = {
                let mut state = self.state.borrow_mut();
                if state.has.contains(&id) {
                    let count = state.circular.entry(id).or_insert(0);
                    *count += 1;
                    *count > self.config.max_update_count
                } else {
                    false
                }
            };
            if runaway {
                self.report_runaway(job.as_ref());
                summary.aborted_by = Some(id);
                break;
            }

            index += 1;
        }

        Ok(summary)
    }

    fn report_runaway(&self, job: &dyn ScheduledJob) {
        let origin = if job.is_user() {
            LoopSource::UserWatcher {
                expression: job.expression().to_string(),
            }
        } else {
            LoopSource::RenderFunction
        };
        let diagnostic = Diagnostic::RunawayUpdateLoop {
            watcher: job.id(),
            origin,
        };
        self.diagnostics.warn(&diagnostic, job.owner().as_ref());
    }

    fn call_activated_hooks(&self, owners: &[Rc<Owner>]) {
        for owner in owners {
            // Destroyed while waiting for the flush: stays inactive.
            if owner.is_destroyed() {
                owner.set_inactive(true);
                continue;
            }
            owner.set_inactive(false);
            self.hooks.call_hook(owner, LifecycleHook::Activated);
        }
    }

    fn call_updated_hooks(&self, jobs: &[Rc<dyn ScheduledJob>]) {
        for job in jobs.iter().rev() {
            let Some(owner) = job.owner() else {
                continue;
            };
            if owner.primary_watcher() == Some(job.id())
                && owner.is_mounted()
                && !owner.is_destroyed()
            {
                self.hooks.call_hook(&owner, LifecycleHook::Updated);
            }
        }
    }

    /// Clear all queue state and flags.
    pub fn reset(&self) {
        *self.state.borrow_mut() = QueueState::default();
        self.flushing.set(false);
        self.waiting.set(false);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("queued", &self.queued_ids())
            .field("flushing", &self.flushing.get())
            .field("waiting", &self.waiting.get())
            .finish()
    }
}

/// Builder for [`Scheduler`].
///
/// Unset collaborators default to a fresh [`TickQueue`], [`TracingSink`] and
/// [`NoopHooks`].
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    deferrer: Option<Rc<dyn Deferrer>>,
    diagnostics: Option<Rc<dyn DiagnosticSink>>,
    errors: Option<Rc<dyn ErrorReporter>>,
    hooks: Option<Rc<dyn HookDispatcher>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn deferrer(mut self, deferrer: Rc<dyn Deferrer>) -> Self {
        self.deferrer = Some(deferrer);
        self
    }

    pub fn diagnostics(mut self, sink: Rc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn errors(mut self, reporter: Rc<dyn ErrorReporter>) -> Self {
        self.errors = Some(reporter);
        self
    }

    pub fn hooks(mut self, hooks: Rc<dyn HookDispatcher>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Rc<Scheduler> {
        Rc::new_cyclic(|weak_self| Scheduler {
            config: self.config,
            deferrer: self.deferrer.unwrap_or_else(|| Rc::new(TickQueue::new())),
            diagnostics: self.diagnostics.unwrap_or_else(|| Rc::new(TracingSink)),
            errors: self.errors.unwrap_or_else(|| Rc::new(TracingSink)),
            hooks: self.hooks.unwrap_or_else(|| Rc::new(NoopHooks)),
            weak_self: weak_self.clone(),
            state: RefCell::new(QueueState::default()),
            flushing: Cell::new(false),
            waiting: Cell::new(false),
            flush_started_at: Cell::new(None),
        })
    }
}
