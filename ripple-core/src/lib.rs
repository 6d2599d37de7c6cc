//! Ripple Core
//!
//! This crate provides a dependency-tracking reactive scheduler. It
//! implements:
//!
//! - Observable sources and automatic dependency tracking
//! - Watchers (eager, lazy, sync, deep and user-sandboxed)
//! - A batching scheduler that runs invalidated watchers in id order
//! - Post-flush lifecycle hooks for watcher owners
//!
//! Everything is single-threaded: handles are `Rc`-based and the active
//! context is thread-local.
//!
//! # Architecture
//!
//! - `reactive`: sources, deps, the active context, watchers and computeds
//! - `scheduler`: the flush queue, deferral primitives and owners
//! - `diagnostics`: warning and error sinks
//! - `config`: scheduler configuration
//! - `error`: the error type for trusted evaluation failures
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use ripple_core::reactive::{Signal, Watcher};
//! use ripple_core::scheduler::{Scheduler, TickQueue};
//!
//! let ticks = Rc::new(TickQueue::new());
//! let scheduler = Scheduler::builder().deferrer(ticks.clone()).build();
//!
//! let count = Signal::new(0);
//! let source = count.clone();
//! let _watcher = Watcher::builder(&scheduler, move || source.get())
//!     .callback(|new, old| println!("count: {old:?} -> {new}"))
//!     .build()?;
//!
//! count.set(1)?;
//! count.set(2)?;
//! ticks.run_pending();
//! // Prints once: "count: Some(0) -> 2"
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod reactive;
pub mod scheduler;

pub use config::{FlushMode, SchedulerConfig};
pub use diagnostics::{Diagnostic, DiagnosticSink, ErrorReporter, LoopSource, TracingSink};
pub use error::{BoxError, WatchError};
pub use reactive::{Computed, Signal, State, Value, Watcher, WatcherId, WatcherOptions};
pub use scheduler::{Owner, Scheduler};
