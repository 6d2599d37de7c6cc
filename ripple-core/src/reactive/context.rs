//! Active Context
//!
//! The active context records which computation is currently evaluating,
//! so that a source being read knows whom to register against.
//!
//! # Implementation
//!
//! There is one slot per thread holding at most one subscriber. Entering a
//! context swaps the new subscriber into the slot and remembers the old
//! occupant; dropping the guard puts it back. Nested evaluations (a watcher
//! constructed inside another watcher's getter) therefore restore the outer
//! watcher when they finish, and reads outside any context are untracked.

use std::cell::RefCell;
use std::rc::Rc;

use super::subscriber::{Subscriber, WatcherId};

thread_local! {
    static ACTIVE: RefCell<Option<Rc<dyn Subscriber>>> = const { RefCell::new(None) };
}

/// Guard that restores the previously active subscriber when dropped.
///
/// This keeps the slot consistent even if the computation panics.
pub struct ActiveContext {
    id: WatcherId,
    previous: Option<Rc<dyn Subscriber>>,
}

impl ActiveContext {
    /// Make `subscriber` the active one until the returned guard drops.
    pub fn enter(subscriber: Rc<dyn Subscriber>) -> Self {
        let id = subscriber.id();
        let previous = ACTIVE.with(|slot| slot.borrow_mut().replace(subscriber));
        Self { id, previous }
    }

    /// Check if there is an active subscriber.
    pub fn is_active() -> bool {
        ACTIVE.with(|slot| slot.borrow().is_some())
    }

    /// The active subscriber, if any.
    pub fn current() -> Option<Rc<dyn Subscriber>> {
        ACTIVE.with(|slot| slot.borrow().clone())
    }

    /// The id of the active subscriber, if any.
    pub fn current_id() -> Option<WatcherId> {
        ACTIVE.with(|slot| slot.borrow().as_ref().map(|sub| sub.id()))
    }
}

impl Drop for ActiveContext {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|slot| {
            let popped = std::mem::replace(&mut *slot.borrow_mut(), previous);
            if let Some(sub) = popped {
                debug_assert_eq!(
                    sub.id(),
                    self.id,
                    "ActiveContext mismatch: expected {}, got {}",
                    self.id,
                    sub.id()
                );
            }
        });
    }
}
