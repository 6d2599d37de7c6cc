//! Dependency Registry
//!
//! A [`Dep`] is the subscriber set of one observable source. Sources call
//! [`Dep::depend`] when they are read and [`Dep::notify`] when they change;
//! subscribers are held weakly so a dropped watcher never keeps a source
//! busy.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::context::ActiveContext;
use super::subscriber::{Subscriber, WatcherId};
use crate::error::WatchError;

/// Unique identifier for a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

type SubscriberList = SmallVec<[(WatcherId, Weak<dyn Subscriber>); 4]>;

/// The set of subscribers of one source.
pub struct Dep {
    id: DepId,
    subs: RefCell<SubscriberList>,
}

impl Dep {
    /// Create a dependency with no subscribers.
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: DepId::next(),
            subs: RefCell::new(SmallVec::new()),
        })
    }

    pub fn id(&self) -> DepId {
        self.id
    }

    /// Subscribe `sub` to this source.
    pub fn add_sub(&self, sub: Weak<dyn Subscriber>, id: WatcherId) {
        self.subs.borrow_mut().push((id, sub));
    }

    /// Unsubscribe the subscriber with the given id.
    pub fn remove_sub(&self, id: WatcherId) {
        self.subs.borrow_mut().retain(|(sub_id, _)| *sub_id != id);
    }

    /// Register this source against the active subscriber, if there is one.
    pub fn depend(self: &Rc<Self>) {
        if let Some(active) = ActiveContext::current() {
            active.add_dep(self);
        }
    }

    /// Notify every live subscriber, lowest id first.
    ///
    /// The subscriber list is snapshotted first, so subscribers may add or
    /// remove subscriptions while being notified. The first error returned
    /// by a subscriber stops the notification and is propagated.
    pub fn notify(&self) -> Result<(), WatchError> {
        let mut live: SmallVec<[(WatcherId, Rc<dyn Subscriber>); 4]> = {
            let mut subs = self.subs.borrow_mut();
            subs.retain(|(_, weak)| weak.strong_count() > 0);
            subs.iter()
                .filter_map(|(id, weak)| weak.upgrade().map(|sub| (*id, sub)))
                .collect()
        };
        live.sort_by_key(|(id, _)| *id);

        for (_, sub) in live {
            sub.update()?;
        }
        Ok(())
    }

    /// Number of subscribers, including ones that have been dropped but not
    /// yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.subs.borrow().len()
    }

    /// Check whether the subscriber with the given id is subscribed.
    pub fn has_subscriber(&self, id: WatcherId) -> bool {
        self.subs.borrow().iter().any(|(sub_id, _)| *sub_id == id)
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
