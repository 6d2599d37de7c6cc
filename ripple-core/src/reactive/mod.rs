//! Reactive Primitives
//!
//! This module implements dependency tracking: observable sources, the
//! single-slot active context, and the watchers that subscribe to sources.
//!
//! # Concepts
//!
//! ## Sources
//!
//! A source owns a [`Dep`], the set of watchers subscribed to it. Reading a
//! source while a watcher is active records the dep on that watcher; writing
//! the source notifies every subscriber. [`Signal`] is a single typed value;
//! [`State`] and [`List`] form a dynamic nested tree that path and deep
//! watchers read from.
//!
//! ## Watchers
//!
//! A [`Watcher`] evaluates a getter inside an [`ActiveContext`] and is
//! subscribed to exactly the deps read during its last evaluation. When one
//! of them changes it marks itself dirty, re-runs inline, or queues itself
//! on the [`Scheduler`](crate::scheduler::Scheduler).
//!
//! ## Computeds
//!
//! A [`Computed`] is a lazy watcher read on demand. Reading it inside another
//! watcher forwards its deps to the reader.

mod computed;
mod context;
mod dep;
mod path;
mod signal;
mod state;
mod subscriber;
mod traverse;
mod watcher;

pub use computed::Computed;
pub use context::ActiveContext;
pub use dep::{Dep, DepId};
pub use path::Path;
pub use signal::Signal;
pub use state::{List, State, Value};
pub use subscriber::{Subscriber, WatcherId};
pub use traverse::{traverse, Traversal, WatchValue};
pub use watcher::{Callback, Evaluator, Getter, Hook, Watcher, WatcherBuilder, WatcherOptions};
