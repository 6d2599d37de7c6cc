//! Computed Implementation
//!
//! A Computed is a memoized value backed by a lazy [`Watcher`].
//!
//! # How Computeds Work
//!
//! 1. Nothing runs at construction. The watcher starts dirty.
//!
//! 2. `get()` evaluates the watcher only if it is dirty, so any number of
//!    reads between two changes cost one evaluation.
//!
//! 3. When read inside another watcher, the computed forwards its own
//!    sources to that watcher. The reader then re-runs when any of them
//!    changes, even though the computed itself never enters the queue.

use std::fmt;
use std::rc::Rc;

use super::context::ActiveContext;
use super::traverse::WatchValue;
use super::watcher::{Watcher, WatcherBuilder};
use crate::error::{BoxError, WatchError};
use crate::scheduler::Scheduler;

/// A lazily evaluated, cached derived value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(2);
/// let source = count.clone();
/// let doubled = Computed::new(&scheduler, move || source.get() * 2);
///
/// assert_eq!(doubled.get()?, 4);
/// count.set(5)?;
/// assert!(doubled.is_dirty());
/// assert_eq!(doubled.get()?, 10);
/// ```
pub struct Computed<T: WatchValue> {
    watcher: Watcher<T>,
}

impl<T: WatchValue> Computed<T> {
    pub fn new<F>(scheduler: &Rc<Scheduler>, getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::from_builder(Watcher::builder(scheduler, getter))
    }

    pub fn try_new<F>(scheduler: &Rc<Scheduler>, getter: F) -> Self
    where
        F: Fn() -> Result<T, BoxError> + 'static,
    {
        Self::from_builder(Watcher::try_builder(scheduler, getter))
    }

    /// Build a computed from a configured builder (owner, expression,
    /// user flag). The watcher is always made lazy.
    pub fn from_builder(builder: WatcherBuilder<T>) -> Self {
        Self {
            watcher: builder.build_lazy(),
        }
    }

    /// Read the value, evaluating first if it is stale.
    ///
    /// Returns [`WatchError::Unavailable`] if a sandboxed getter has never
    /// produced a value.
    pub fn get(&self) -> Result<T, WatchError> {
        if self.watcher.is_dirty() {
            self.watcher.evaluate()?;
        }
        if ActiveContext::is_active() {
            self.watcher.depend();
        }
        self.watcher.value().ok_or_else(|| WatchError::Unavailable {
            expression: self.watcher.expression().to_string(),
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// The backing watcher.
    pub fn watcher(&self) -> &Watcher<T> {
        &self.watcher
    }

    pub fn teardown(&self) {
        self.watcher.teardown();
    }
}

impl<T: WatchValue> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            watcher: self.watcher.clone(),
        }
    }
}

impl<T: WatchValue + fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("watcher", &self.watcher)
            .finish()
    }
}
