//! Signal Implementation
//!
//! A Signal is the simplest observable source: one value and one [`Dep`].
//!
//! # How Signals Work
//!
//! 1. When a signal is read inside an active context, the active watcher
//!    records the signal's dep.
//!
//! 2. When the signal is written, the dep notifies every subscribed watcher,
//!    which then recomputes, marks itself stale, or asks the scheduler for a
//!    slot, depending on its kind.
//!
//! Writes return a `Result` because a `sync` watcher runs inline during the
//! notification, and a trusted watcher's failure propagates to the writer.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::dep::{Dep, DepId};
use super::traverse::{Traversal, WatchValue};
use crate::error::WatchError;

/// An observable value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value (tracked inside a watcher)
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5)?;
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T> {
    dep: Rc<Dep>,
    value: RefCell<T>,
}

impl<T: Clone> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                dep: Dep::new(),
                value: RefCell::new(value),
            }),
        }
    }

    /// Get the id of the signal's dep.
    pub fn id(&self) -> DepId {
        self.inner.dep.id()
    }

    /// The signal's dep.
    pub fn dep(&self) -> &Rc<Dep> {
        &self.inner.dep
    }

    /// Get the current value, recording a dependency if a watcher is active.
    pub fn get(&self) -> T {
        self.inner.dep.depend();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Update the value in place and notify subscribers.
    ///
    /// Always notifies, since the closure may have mutated the value.
    pub fn update<F>(&self, f: F) -> Result<(), WatchError>
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.inner.value.borrow_mut());
        self.inner.dep.notify()
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }
}

impl<T: WatchValue> Signal<T> {
    /// Set a new value and notify subscribers.
    ///
    /// Writing a value that is [`same_as`](WatchValue::same_as) the current
    /// one is a no-op.
    pub fn set(&self, value: T) -> Result<(), WatchError> {
        {
            let mut current = self.inner.value.borrow_mut();
            if current.same_as(&value) {
                return Ok(());
            }
            *current = value;
        }
        self.inner.dep.notify()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Debug> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.dep.id())
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T: WatchValue> WatchValue for Signal<T> {
    fn is_primitive(&self) -> bool {
        false
    }

    fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn traverse(&self, traversal: &mut Traversal) {
        if traversal.visit(Rc::as_ptr(&self.inner)) {
            self.get().traverse(traversal);
        }
    }
}
