//! Owners and Post-Flush Hooks
//!
//! An [`Owner`] is the component-like object watchers belong to. It keeps
//! its watchers alive, remembers which of them is the primary (render)
//! watcher, and carries the lifecycle flags the scheduler consults before
//! dispatching `updated` / `activated` hooks.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::queue::ScheduledJob;
use crate::reactive::{State, Value, WatcherId};

/// Lifecycle hooks dispatched after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    /// The owner's primary watcher ran during the flush.
    Updated,
    /// The owner was queued for activation.
    Activated,
}

impl LifecycleHook {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Activated => "activated",
        }
    }
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receives post-flush lifecycle hooks.
pub trait HookDispatcher {
    fn call_hook(&self, owner: &Rc<Owner>, hook: LifecycleHook);
}

/// Dispatcher that ignores every hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl HookDispatcher for NoopHooks {
    fn call_hook(&self, _owner: &Rc<Owner>, _hook: LifecycleHook) {}
}

/// The owner of a group of watchers.
pub struct Owner {
    name: String,
    data: State,
    watchers: RefCell<Vec<Rc<dyn ScheduledJob>>>,
    primary: Cell<Option<WatcherId>>,
    mounted: Cell<bool>,
    destroyed: Cell<bool>,
    being_destroyed: Cell<bool>,
    inactive: Cell<bool>,
}

impl Owner {
    /// Create an owner with an empty data root.
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Self::with_data(name, State::new())
    }

    /// Create an owner whose path watchers read from `data`.
    pub fn with_data(name: impl Into<String>, data: State) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            data,
            watchers: RefCell::new(Vec::new()),
            primary: Cell::new(None),
            mounted: Cell::new(false),
            destroyed: Cell::new(false),
            being_destroyed: Cell::new(false),
            inactive: Cell::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &State {
        &self.data
    }

    /// The data root as a value, the starting point for path getters.
    pub fn root(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Id of the current primary watcher.
    pub fn primary_watcher(&self) -> Option<WatcherId> {
        self.primary.get()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.borrow().len()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.get()
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.set(mounted);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.being_destroyed.get()
    }

    pub fn is_inactive(&self) -> bool {
        self.inactive.get()
    }

    pub fn set_inactive(&self, inactive: bool) {
        self.inactive.set(inactive);
    }

    /// Tear down every owned watcher and mark the owner destroyed.
    ///
    /// Watchers skip removing themselves from the collection while it is
    /// being destroyed; the collection is dropped wholesale instead.
    pub fn destroy(&self) {
        if self.being_destroyed.replace(true) {
            return;
        }
        let watchers = std::mem::take(&mut *self.watchers.borrow_mut());
        for watcher in &watchers {
            watcher.teardown();
        }
        self.primary.set(None);
        self.destroyed.set(true);
        tracing::debug!(owner = %self.name, watchers = watchers.len(), "owner destroyed");
    }

    /// Take ownership of a watcher, recording it as primary if asked.
    pub(crate) fn adopt(&self, job: Rc<dyn ScheduledJob>, primary: bool) {
        if primary {
            self.primary.set(Some(job.id()));
        }
        self.watchers.borrow_mut().push(job);
    }

    /// Drop a watcher from the collection.
    pub(crate) fn release(&self, id: WatcherId) {
        self.watchers.borrow_mut().retain(|job| job.id() != id);
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("name", &self.name)
            .field("watcher_count", &self.watcher_count())
            .field("primary", &self.primary.get())
            .field("mounted", &self.mounted.get())
            .field("destroyed", &self.destroyed.get())
            .field("inactive", &self.inactive.get())
            .finish()
    }
}
