//! Subscriber types for the reactive system.
//!
//! A Subscriber is any computation that sources can notify. Sources only
//! ever see this narrow interface; the concrete node type lives in
//! [`watcher`](super::watcher).

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::dep::Dep;
use crate::error::WatchError;

/// Unique identifier for a watcher.
///
/// Ids come from one process-wide counter, so they grow in construction
/// order and are never reused. The scheduler relies on this to run parents
/// before children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate the next watcher ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A computation that subscribes to sources.
pub trait Subscriber {
    /// The subscriber's id.
    fn id(&self) -> WatcherId;

    /// Record that `dep` was read during the current evaluation.
    ///
    /// Called by [`Dep::depend`] while this subscriber is the active one.
    fn add_dep(&self, dep: &Rc<Dep>);

    /// React to a change in one of the recorded sources.
    fn update(&self) -> Result<(), WatchError>;
}
