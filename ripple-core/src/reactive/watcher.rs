//! Watcher Implementation
//!
//! A Watcher pairs a getter with an optional callback. It records exactly
//! which sources the getter read during its last evaluation and reacts when
//! any of them changes.
//!
//! # How Watchers Work
//!
//! 1. `get()` makes the watcher the active subscriber, runs the getter and
//!    lets every source read along the way call back into `add_dep`.
//!
//! 2. When the getter returns, the dependency sets are reconciled: sources
//!    that were not read this time are unsubscribed, and the new set becomes
//!    the current one. A watcher is therefore subscribed to exactly what its
//!    last evaluation read.
//!
//! 3. On invalidation a watcher either marks itself dirty (`lazy`), re-runs
//!    inline (`sync`), or asks the [`Scheduler`] for a slot in the next
//!    flush.
//!
//! # Kinds
//!
//! - Trusted watchers are internal; getter and callback failures propagate.
//! - Sandboxed (user) watchers run externally supplied code; failures are
//!   reported to the scheduler's [`ErrorReporter`](crate::diagnostics::ErrorReporter)
//!   and never returned.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::context::ActiveContext;
use super::dep::{Dep, DepId};
use super::path::Path;
use super::state::Value;
use super::subscriber::{Subscriber, WatcherId};
use super::traverse::{traverse, WatchValue};
use crate::diagnostics::Diagnostic;
use crate::error::{BoxError, WatchError};
use crate::scheduler::{Owner, ScheduledJob, Scheduler};

/// A fallible getter.
pub type Getter<T> = Rc<dyn Fn() -> Result<T, BoxError>>;

/// A fallible change callback, called with the new and the previous value.
pub type Callback<T> = Rc<dyn Fn(&T, Option<&T>) -> Result<(), BoxError>>;

/// A zero-argument hook.
pub type Hook = Rc<dyn Fn()>;

/// How a getter's failures are handled.
pub enum Evaluator<T> {
    /// Internal code: failures propagate to the caller.
    Trusted(Getter<T>),
    /// Externally supplied code: failures are reported and swallowed.
    Sandboxed(Getter<T>),
}

impl<T> Evaluator<T> {
    fn call(&self) -> Result<T, BoxError> {
        match self {
            Self::Trusted(getter) | Self::Sandboxed(getter) => getter(),
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        matches!(self, Self::Sandboxed(_))
    }
}

impl<T> fmt::Debug for Evaluator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trusted(_) => f.write_str("Trusted"),
            Self::Sandboxed(_) => f.write_str("Sandboxed"),
        }
    }
}

/// Construction options for a [`Watcher`].
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Traverse the whole value so nested mutations are tracked.
    pub deep: bool,
    /// Re-run inline on invalidation instead of queuing.
    pub sync: bool,
    /// Compute only on demand; invalidation only marks the watcher dirty.
    pub lazy: bool,
    /// Getter and callback are user code; their errors are sandboxed.
    pub user: bool,
    /// Called right before the watcher runs during a flush.
    pub before: Option<Hook>,
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("deep", &self.deep)
            .field("sync", &self.sync)
            .field("lazy", &self.lazy)
            .field("user", &self.user)
            .field("before", &self.before.is_some())
            .finish()
    }
}

struct WatcherInner<T: WatchValue> {
    id: WatcherId,
    weak_self: Weak<WatcherInner<T>>,
    expression: String,
    scheduler: Rc<Scheduler>,
    owner: Weak<Owner>,
    evaluator: Evaluator<T>,
    callback: Option<Callback<T>>,
    options: WatcherOptions,
    value: RefCell<Option<T>>,
    deps: RefCell<IndexMap<DepId, Rc<Dep>>>,
    new_deps: RefCell<IndexMap<DepId, Rc<Dep>>>,
    active: Cell<bool>,
    dirty: Cell<bool>,
}

impl<T: WatchValue> WatcherInner<T> {
    /// Evaluate the getter inside an active context.
    ///
    /// `Ok(None)` means a sandboxed getter failed and the failure has been
    /// reported: there is no new value.
    fn evaluate_getter(&self) -> Result<Option<T>, WatchError> {
        let Some(this) = self.weak_self.upgrade() else {
            return Ok(None);
        };

        let outcome = {
            let _active = ActiveContext::enter(this);
            let outcome = self.evaluator.call();
            if self.options.deep {
                if let Ok(value) = &outcome {
                    traverse(value);
                }
            }
            outcome
        };
        self.cleanup_deps();

        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(source) => {
                let err = WatchError::Getter {
                    expression: self.expression.clone(),
                    source,
                };
                self.sandbox(err).map(|()| None)
            }
        }
    }

    /// Propagate `err` from a trusted watcher; report it for a sandboxed one.
    fn sandbox(&self, err: WatchError) -> Result<(), WatchError> {
        match &self.evaluator {
            Evaluator::Trusted(_) => Err(err),
            Evaluator::Sandboxed(_) => {
                self.scheduler
                    .errors()
                    .report(&err, self.owner.upgrade().as_ref());
                Ok(())
            }
        }
    }

    fn add_dependency(&self, dep: &Rc<Dep>) {
        let id = dep.id();
        {
            let mut new_deps = self.new_deps.borrow_mut();
            if new_deps.contains_key(&id) {
                return;
            }
            new_deps.insert(id, Rc::clone(dep));
        }
        if !self.deps.borrow().contains_key(&id) {
            let weak: Weak<dyn Subscriber> = self.weak_self.clone();
            dep.add_sub(weak, self.id);
        }
    }

    fn cleanup_deps(&self) {
        let mut deps = self.deps.borrow_mut();
        let mut new_deps = self.new_deps.borrow_mut();
        for (id, dep) in deps.iter() {
            if !new_deps.contains_key(id) {
                dep.remove_sub(self.id);
            }
        }
        std::mem::swap(&mut *deps, &mut *new_deps);
        new_deps.clear();
    }

    fn update(&self) -> Result<(), WatchError> {
        if !self.active.get() {
            return Ok(());
        }
        if self.options.lazy {
            self.dirty.set(true);
            Ok(())
        } else if self.options.sync {
            self.run()
        } else {
            let Some(this) = self.weak_self.upgrade() else {
                return Ok(());
            };
            self.scheduler.queue_watcher(this)
        }
    }

    fn run(&self) -> Result<(), WatchError> {
        if !self.active.get() {
            return Ok(());
        }
        let Some(value) = self.evaluate_getter()? else {
            return Ok(());
        };

        // Non-primitive values may have been mutated in place, so they
        // always count as changed.
        let changed = match self.value.borrow().as_ref() {
            Some(old) => !value.same_as(old),
            None => true,
        } || !value.is_primitive()
            || self.options.deep;
        if !changed {
            return Ok(());
        }

        let old = self.value.replace(Some(value.clone()));
        if let Some(callback) = &self.callback {
            if let Err(source) = callback(&value, old.as_ref()) {
                self.sandbox(WatchError::Callback {
                    expression: self.expression.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    fn evaluate(&self) -> Result<(), WatchError> {
        if let Some(value) = self.evaluate_getter()? {
            self.value.replace(Some(value));
        }
        self.dirty.set(false);
        Ok(())
    }

    fn depend(&self) {
        let deps: Vec<Rc<Dep>> = self.deps.borrow().values().cloned().collect();
        for dep in deps {
            dep.depend();
        }
    }

    fn teardown(&self) {
        if !self.active.get() {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            if !owner.is_being_destroyed() {
                owner.release(self.id);
            }
        }
        for dep in self.deps.borrow().values() {
            dep.remove_sub(self.id);
        }
        self.active.set(false);
        tracing::trace!(watcher = %self.id, expression = %self.expression, "watcher torn down");
    }
}

impl<T: WatchValue> Subscriber for WatcherInner<T> {
    fn id(&self) -> WatcherId {
        self.id
    }

    fn add_dep(&self, dep: &Rc<Dep>) {
        self.add_dependency(dep);
    }

    fn update(&self) -> Result<(), WatchError> {
        WatcherInner::update(self)
    }
}

impl<T: WatchValue> ScheduledJob for WatcherInner<T> {
    fn id(&self) -> WatcherId {
        self.id
    }

    fn expression(&self) -> &str {
        &self.expression
    }

    fn is_user(&self) -> bool {
        self.evaluator.is_sandboxed()
    }

    fn owner(&self) -> Option<Rc<Owner>> {
        self.owner.upgrade()
    }

    fn before(&self) {
        if let Some(before) = &self.options.before {
            before();
        }
    }

    fn run(&self) -> Result<(), WatchError> {
        WatcherInner::run(self)
    }

    fn teardown(&self) {
        WatcherInner::teardown(self)
    }
}

/// A computation node: a getter, its last value and the sources it read.
///
/// Cloning a `Watcher` yields another handle to the same node.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(1);
/// let source = count.clone();
///
/// let watcher = Watcher::builder(&scheduler, move || source.get() * 2)
///     .callback(|new, old| println!("{old:?} -> {new}"))
///     .build()?;
///
/// count.set(5)?;   // queued
/// ticks.run_pending(); // prints "Some(2) -> 10"
/// ```
pub struct Watcher<T: WatchValue> {
    inner: Rc<WatcherInner<T>>,
}

impl<T: WatchValue> Watcher<T> {
    /// Start building a watcher around an infallible getter.
    pub fn builder<F>(scheduler: &Rc<Scheduler>, getter: F) -> WatcherBuilder<T>
    where
        F: Fn() -> T + 'static,
    {
        let expression = std::any::type_name::<F>().to_string();
        WatcherBuilder::new(scheduler, Rc::new(move || Ok(getter())), expression)
    }

    /// Start building a watcher around a fallible getter.
    pub fn try_builder<F>(scheduler: &Rc<Scheduler>, getter: F) -> WatcherBuilder<T>
    where
        F: Fn() -> Result<T, BoxError> + 'static,
    {
        let expression = std::any::type_name::<F>().to_string();
        WatcherBuilder::new(scheduler, Rc::new(getter), expression)
    }

    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// The expression used to identify this watcher in diagnostics.
    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    /// The last stored value. `None` before a lazy watcher's first
    /// evaluation, or if the first evaluation of a sandboxed getter failed.
    pub fn value(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    pub fn options(&self) -> &WatcherOptions {
        &self.inner.options
    }

    pub fn owner(&self) -> Option<Rc<Owner>> {
        self.inner.owner.upgrade()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Whether a lazy watcher's value is stale.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.options.lazy
    }

    pub fn is_user(&self) -> bool {
        self.inner.evaluator.is_sandboxed()
    }

    /// Evaluate the getter and return the fresh value.
    ///
    /// The stored value is left untouched. If a sandboxed getter fails the
    /// previous value is returned instead.
    pub fn get(&self) -> Result<Option<T>, WatchError> {
        match self.inner.evaluate_getter()? {
            Some(value) => Ok(Some(value)),
            None => Ok(self.value()),
        }
    }

    /// Record `dep` as read during the current evaluation.
    pub fn add_dependency(&self, dep: &Rc<Dep>) {
        self.inner.add_dependency(dep);
    }

    /// Unsubscribe from sources not read in the current evaluation and make
    /// the current set the recorded one.
    pub fn cleanup_deps(&self) {
        self.inner.cleanup_deps();
    }

    /// React to an invalidation.
    pub fn update(&self) -> Result<(), WatchError> {
        self.inner.update()
    }

    /// Re-evaluate and fire the callback if the value changed.
    pub fn run(&self) -> Result<(), WatchError> {
        self.inner.run()
    }

    /// Compute a lazy watcher's value and clear its dirty flag.
    pub fn evaluate(&self) -> Result<(), WatchError> {
        self.inner.evaluate()
    }

    /// Register every recorded source against the active subscriber.
    pub fn depend(&self) {
        self.inner.depend();
    }

    /// Permanently deactivate the watcher. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    /// Ids of the sources read during the last evaluation, in read order.
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.inner.deps.borrow().keys().copied().collect()
    }

    /// This watcher as a schedulable job.
    pub fn as_job(&self) -> Rc<dyn ScheduledJob> {
        self.inner.clone()
    }
}

impl Watcher<Value> {
    /// Start building a watcher that reads a dotted `path` from the owner's
    /// data.
    ///
    /// An unparsable path emits [`Diagnostic::InvalidExpression`] and
    /// yields a watcher that always reads [`Value::Null`].
    pub fn path_builder(
        scheduler: &Rc<Scheduler>,
        owner: &Rc<Owner>,
        path: &str,
    ) -> WatcherBuilder<Value> {
        let getter: Getter<Value> = match Path::parse(path) {
            Some(parsed) => {
                let root = owner.root();
                Rc::new(move || Ok(parsed.read(&root)))
            }
            None => {
                let diagnostic = Diagnostic::InvalidExpression {
                    path: path.to_string(),
                };
                scheduler.diagnostics().warn(&diagnostic, Some(owner));
                Rc::new(|| Ok(Value::Null))
            }
        };
        WatcherBuilder::new(scheduler, getter, path.to_string()).owner(owner)
    }
}

impl<T: WatchValue> Clone for Watcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: WatchValue + fmt::Debug> fmt::Debug for Watcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("evaluator", &self.inner.evaluator)
            .field("value", &self.inner.value.borrow())
            .field("active", &self.inner.active.get())
            .field("dirty", &self.inner.dirty.get())
            .finish()
    }
}

/// Builder for [`Watcher`].
pub struct WatcherBuilder<T> {
    scheduler: Rc<Scheduler>,
    getter: Getter<T>,
    expression: String,
    owner: Option<Rc<Owner>>,
    callback: Option<Callback<T>>,
    options: WatcherOptions,
    primary: bool,
}

impl<T: WatchValue> WatcherBuilder<T> {
    fn new(scheduler: &Rc<Scheduler>, getter: Getter<T>, expression: String) -> Self {
        Self {
            scheduler: Rc::clone(scheduler),
            getter,
            expression,
            owner: None,
            callback: None,
            options: WatcherOptions::default(),
            primary: false,
        }
    }

    /// Attach the watcher to `owner`.
    pub fn owner(mut self, owner: &Rc<Owner>) -> Self {
        self.owner = Some(Rc::clone(owner));
        self
    }

    /// Make the watcher its owner's primary (render) watcher.
    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        self.callback = Some(Rc::new(move |new, old| {
            callback(new, old);
            Ok(())
        }));
        self
    }

    pub fn try_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T, Option<&T>) -> Result<(), BoxError> + 'static,
    {
        self.callback = Some(Rc::new(callback));
        self
    }

    /// Replace all option flags at once.
    pub fn options(mut self, options: WatcherOptions) -> Self {
        self.options = options;
        self
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.options.deep = deep;
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.options.sync = sync;
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.options.lazy = lazy;
        self
    }

    pub fn user(mut self, user: bool) -> Self {
        self.options.user = user;
        self
    }

    pub fn before<F>(mut self, before: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.options.before = Some(Rc::new(before));
        self
    }

    /// Create the watcher. Unless lazy, it is evaluated immediately, and a
    /// trusted getter's failure is returned.
    pub fn build(self) -> Result<Watcher<T>, WatchError> {
        let lazy = self.options.lazy;
        let watcher = self.construct();
        if !lazy {
            let value = watcher.inner.evaluate_getter()?;
            watcher.inner.value.replace(value);
        }
        Ok(watcher)
    }

    /// Create the watcher as a lazy one, which never evaluates here.
    pub(crate) fn build_lazy(mut self) -> Watcher<T> {
        self.options.lazy = true;
        self.construct()
    }

    fn construct(self) -> Watcher<T> {
        let lazy = self.options.lazy;
        let evaluator = if self.options.user {
            Evaluator::Sandboxed(self.getter)
        } else {
            Evaluator::Trusted(self.getter)
        };

        let inner = Rc::new_cyclic(|weak_self| WatcherInner {
            id: WatcherId::new(),
            weak_self: weak_self.clone(),
            expression: self.expression,
            scheduler: self.scheduler,
            owner: self.owner.as_ref().map(Rc::downgrade).unwrap_or_default(),
            evaluator,
            callback: self.callback,
            options: self.options,
            value: RefCell::new(None),
            deps: RefCell::new(IndexMap::new()),
            new_deps: RefCell::new(IndexMap::new()),
            active: Cell::new(true),
            dirty: Cell::new(lazy),
        });
        if let Some(owner) = &self.owner {
            owner.adopt(inner.clone(), self.primary);
        }
        tracing::trace!(watcher = %inner.id, expression = %inner.expression, lazy, "watcher created");
        Watcher { inner }
    }
}
