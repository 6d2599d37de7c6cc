//! Scheduling
//!
//! The [`Scheduler`] batches watcher runs triggered within one synchronous
//! burst into a single ordered flush. When the flush starts is up to a
//! [`Deferrer`]; what happens after it is reported to a [`HookDispatcher`]
//! in terms of [`Owner`]s.

mod defer;
mod owner;
mod queue;

pub use defer::{Deferrer, Inline, Task, TickQueue, TokioDeferrer};
pub use owner::{HookDispatcher, LifecycleHook, NoopHooks, Owner};
pub use queue::{current_flush_timestamp, FlushSummary, ScheduledJob, Scheduler, SchedulerBuilder};
