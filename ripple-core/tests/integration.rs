//! Integration Tests for the Reactive Scheduler
//!
//! These tests verify that sources, watchers, computeds and the scheduler
//! work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_core::diagnostics::{Diagnostic, DiagnosticSink, ErrorReporter, LoopSource};
use ripple_core::error::WatchError;
use ripple_core::reactive::{Computed, Signal, State, Value, Watcher};
use ripple_core::scheduler::{
    current_flush_timestamp, HookDispatcher, LifecycleHook, Owner, Scheduler, TickQueue,
    TokioDeferrer,
};
use ripple_core::SchedulerConfig;
use serde_json::json;

/// Records everything the scheduler reports.
#[derive(Default)]
struct Recorder {
    warnings: RefCell<Vec<Diagnostic>>,
    errors: RefCell<Vec<(String, Option<String>)>>,
    hooks: RefCell<Vec<(String, LifecycleHook)>>,
}

impl DiagnosticSink for Recorder {
    fn warn(&self, diagnostic: &Diagnostic, _owner: Option<&Rc<Owner>>) {
        self.warnings.borrow_mut().push(diagnostic.clone());
    }
}

impl ErrorReporter for Recorder {
    fn report(&self, error: &WatchError, owner: Option<&Rc<Owner>>) {
        let owner = owner.map(|o| o.name().to_string());
        self.errors.borrow_mut().push((error.to_string(), owner));
    }
}

impl HookDispatcher for Recorder {
    fn call_hook(&self, owner: &Rc<Owner>, hook: LifecycleHook) {
        self.hooks.borrow_mut().push((owner.name().to_string(), hook));
    }
}

struct Harness {
    ticks: Rc<TickQueue>,
    recorder: Rc<Recorder>,
    scheduler: Rc<Scheduler>,
}

fn harness() -> Harness {
    harness_with(SchedulerConfig::default())
}

fn harness_with(config: SchedulerConfig) -> Harness {
    let ticks = Rc::new(TickQueue::new());
    let recorder = Rc::new(Recorder::default());
    let scheduler = Scheduler::builder()
        .config(config)
        .deferrer(ticks.clone())
        .diagnostics(recorder.clone())
        .errors(recorder.clone())
        .hooks(recorder.clone())
        .build();
    Harness {
        ticks,
        recorder,
        scheduler,
    }
}

/// Test that a parent and a child reading through it run once each, parent
/// first.
#[test]
fn parent_runs_before_child() {
    let h = harness();
    let source = Signal::new(1i32);
    let order = Rc::new(RefCell::new(Vec::new()));
    let child_calls = Rc::new(RefCell::new(Vec::new()));

    let s = source.clone();
    let log = order.clone();
    let parent = Watcher::builder(&h.scheduler, move || s.get() * 10)
        .before(move || log.borrow_mut().push("parent"))
        .build()
        .unwrap();

    // The child reads the parent's value and inherits its sources.
    let through = parent.clone();
    let log = order.clone();
    let calls = child_calls.clone();
    let child = Watcher::builder(&h.scheduler, move || {
        through.depend();
        through.value().unwrap_or_default() + 1
    })
    .before(move || log.borrow_mut().push("child"))
    .callback(move |new, old| calls.borrow_mut().push((*new, old.copied())))
    .build()
    .unwrap();
    assert!(parent.id() < child.id());

    source.set(2).unwrap();
    assert!(h.scheduler.is_queued(parent.id()));
    assert!(h.scheduler.is_queued(child.id()));

    h.ticks.run_pending();
    assert_eq!(*order.borrow(), vec!["parent", "child"]);
    assert_eq!(*child_calls.borrow(), vec![(21, Some(11))]);
}

/// Test that two writes before a flush produce one run with the last value.
#[test]
fn writes_within_a_burst_are_batched() {
    let h = harness();
    let source = Signal::new(0i32);
    let runs = Rc::new(Cell::new(0));
    let calls = Rc::new(RefCell::new(Vec::new()));

    let (s, counter, sink) = (source.clone(), runs.clone(), calls.clone());
    let watcher = Watcher::builder(&h.scheduler, move || {
        counter.set(counter.get() + 1);
        s.get()
    })
    .callback(move |new, old| sink.borrow_mut().push((*new, old.copied())))
    .build()
    .unwrap();

    source.set(1).unwrap();
    source.set(2).unwrap();
    assert_eq!(h.scheduler.queued_ids(), vec![watcher.id()]);
    assert_eq!(h.ticks.pending(), 1);

    h.ticks.run_pending();
    // One evaluation at construction, one in the flush.
    assert_eq!(runs.get(), 2);
    assert_eq!(*calls.borrow(), vec![(2, Some(0))]);
}

/// Test that a sync watcher has run by the time the write returns.
#[test]
fn sync_watcher_runs_inline() {
    let h = harness();
    let source = Signal::new(0i32);
    let seen = Rc::new(Cell::new(-1));

    let (s, sink) = (source.clone(), seen.clone());
    let _watcher = Watcher::builder(&h.scheduler, move || s.get())
        .sync(true)
        .callback(move |new, _| sink.set(*new))
        .build()
        .unwrap();

    source.set(7).unwrap();
    assert_eq!(seen.get(), 7);
    assert_eq!(h.ticks.pending(), 0);
}

/// Test that watchers which keep re-invalidating each other are cut off.
#[test]
fn runaway_chain_is_aborted_with_a_diagnostic() {
    let h = harness();
    let ping = Signal::new(0i32);
    let pong = Signal::new(0i32);

    // `echo` bounces every pong back to ping, inline.
    let (reads, writes) = (pong.clone(), ping.clone());
    let _echo = Watcher::builder(&h.scheduler, move || reads.get())
        .sync(true)
        .try_callback(move |new, _| Ok(writes.set(*new + 1)?))
        .build()
        .unwrap();

    let (reads, writes) = (ping.clone(), pong.clone());
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let looping = Watcher::builder(&h.scheduler, move || reads.get())
        .user(true)
        .expression("ping")
        .try_callback(move |new, _| {
            counter.set(counter.get() + 1);
            Ok(writes.set(*new)?)
        })
        .build()
        .unwrap();

    ping.set(1).unwrap();
    let summary = h.scheduler.flush().unwrap();

    assert_eq!(summary.aborted_by, Some(looping.id()));
    assert_eq!(runs.get(), 101);
    assert_eq!(
        *h.recorder.warnings.borrow(),
        vec![Diagnostic::RunawayUpdateLoop {
            watcher: looping.id(),
            origin: LoopSource::UserWatcher {
                expression: "ping".to_string()
            },
        }]
    );
    assert!(!h.scheduler.is_flushing());
    assert!(!h.scheduler.is_waiting());
}

/// Test that a lazy watcher starts dirty and computes on demand.
#[test]
fn lazy_watcher_computes_on_evaluate() {
    let h = harness();
    let source = Signal::new(3i32);
    let s = source.clone();

    let watcher = Watcher::builder(&h.scheduler, move || s.get() * s.get())
        .lazy(true)
        .build()
        .unwrap();

    assert_eq!(watcher.value(), None);
    assert!(watcher.is_dirty());
    assert_eq!(h.scheduler.queue_len(), 0);
    assert!(watcher.dep_ids().is_empty());

    watcher.evaluate().unwrap();
    assert_eq!(watcher.value(), Some(9));
    assert!(!watcher.is_dirty());

    source.set(4).unwrap();
    assert!(watcher.is_dirty());
    assert_eq!(h.scheduler.queue_len(), 0);
}

/// Test that flush order follows ids, not enqueue order.
#[test]
fn flush_order_is_ascending_by_id() {
    let h = harness();
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut sources = Vec::new();
    let mut watchers = Vec::new();

    // Watchers are created in index order, so their ids ascend with it.
    for index in 0..5 {
        let source = Signal::new(0i32);
        let (s, log) = (source.clone(), order.clone());
        let watcher = Watcher::builder(&h.scheduler, move || s.get())
            .before(move || log.borrow_mut().push(index))
            .build()
            .unwrap();
        watchers.push(watcher);
        sources.push(source);
    }

    for source in sources.iter().rev() {
        source.set(1).unwrap();
    }
    h.ticks.run_pending();

    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
}

/// Test that a watcher torn down while queued is skipped silently.
#[test]
fn torn_down_watcher_skips_its_slot() {
    let h = harness();
    let source = Signal::new(0i32);
    let fired = Rc::new(Cell::new(false));

    let (s, flag) = (source.clone(), fired.clone());
    let watcher = Watcher::builder(&h.scheduler, move || s.get())
        .callback(move |_, _| flag.set(true))
        .build()
        .unwrap();

    source.set(1).unwrap();
    watcher.teardown();

    let summary = h.scheduler.flush().unwrap();
    assert_eq!(summary.ran, 1);
    assert!(!fired.get());
}

/// Test that subscriptions track exactly the last evaluation's reads.
#[test]
fn subscriptions_match_last_evaluation() {
    let h = harness();
    let use_first = Signal::new(true);
    let first = Signal::new(1i32);
    let second = Signal::new(2i32);

    let (u, a, b) = (use_first.clone(), first.clone(), second.clone());
    let watcher = Watcher::builder(&h.scheduler, move || if u.get() { a.get() } else { b.get() })
        .build()
        .unwrap();
    assert_eq!(first.subscriber_count(), 1);
    assert_eq!(second.subscriber_count(), 0);

    use_first.set(false).unwrap();
    h.ticks.run_pending();
    assert_eq!(first.subscriber_count(), 0);
    assert_eq!(second.subscriber_count(), 1);

    // Writes to the dropped source no longer queue the watcher.
    first.set(10).unwrap();
    assert!(!h.scheduler.is_queued(watcher.id()));
}

/// Test that object values always count as changed.
#[test]
fn object_values_fire_even_when_identical() {
    let h = harness();
    let state = State::from_json(&json!({"n": 1}));
    let fired = Rc::new(Cell::new(0));

    let (st, counter) = (state.clone(), fired.clone());
    let _watcher = Watcher::builder(&h.scheduler, move || {
        st.get("n");
        Value::Object(st.clone())
    })
    .callback(move |_, _| counter.set(counter.get() + 1))
    .build()
    .unwrap();

    state.set("n", 2i32).unwrap();
    h.ticks.run_pending();
    assert_eq!(fired.get(), 1);
}

/// Test that a deep path watcher fires on a nested write.
#[test]
fn deep_path_watcher_sees_nested_writes() {
    let h = harness();
    let owner = Owner::with_data(
        "form",
        State::from_json(&json!({"profile": {"address": {"city": "Oslo"}}})),
    );
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();

    let _watcher = Watcher::path_builder(&h.scheduler, &owner, "profile")
        .deep(true)
        .user(true)
        .callback(move |_, _| counter.set(counter.get() + 1))
        .build()
        .unwrap();

    let address = owner
        .data()
        .get("profile")
        .as_object()
        .unwrap()
        .get("address");
    address.as_object().unwrap().set("city", "Bergen").unwrap();
    h.ticks.run_pending();
    assert_eq!(fired.get(), 1);

    // Adding a new nested key also counts.
    address.as_object().unwrap().set("zip", "5003").unwrap();
    h.ticks.run_pending();
    assert_eq!(fired.get(), 2);
}

/// Test that user errors are reported with their owner and do not stop the
/// flush.
#[test]
fn user_errors_are_reported_and_flush_continues() {
    let h = harness();
    let owner = Owner::new("widget");
    let source = Signal::new(0i32);
    let later_ran = Rc::new(Cell::new(false));

    let s = source.clone();
    let _failing = Watcher::builder(&h.scheduler, move || s.get())
        .owner(&owner)
        .user(true)
        .expression("value")
        .try_callback(|_, _| Err("boom".into()))
        .build()
        .unwrap();

    let (s, flag) = (source.clone(), later_ran.clone());
    let _later = Watcher::builder(&h.scheduler, move || s.get())
        .callback(move |_, _| flag.set(true))
        .build()
        .unwrap();

    source.set(1).unwrap();
    h.ticks.run_pending();

    assert!(later_ran.get());
    assert_eq!(
        *h.recorder.errors.borrow(),
        vec![(
            "error in callback for watcher \"value\": boom".to_string(),
            Some("widget".to_string())
        )]
    );
}

/// Test that a trusted failure aborts the flush but leaves the scheduler
/// usable.
#[test]
fn trusted_failure_resets_scheduler() {
    let h = harness();
    let source = Signal::new(0i32);
    let fail = Rc::new(Cell::new(true));

    let (s, failing) = (source.clone(), fail.clone());
    let _watcher = Watcher::builder(&h.scheduler, move || s.get())
        .try_callback(move |_, _| {
            if failing.get() {
                return Err("internal".into());
            }
            Ok(())
        })
        .build()
        .unwrap();

    source.set(1).unwrap();
    assert!(matches!(h.scheduler.flush(), Err(WatchError::Callback { .. })));
    assert!(!h.scheduler.is_waiting());
    assert_eq!(h.scheduler.queue_len(), 0);

    fail.set(false);
    source.set(2).unwrap();
    assert!(h.scheduler.is_waiting());
    h.ticks.run_pending();
    assert!(!h.scheduler.is_waiting());
}

/// Test that a deferred flush reports a trusted failure instead of losing it.
#[test]
fn deferred_trusted_failure_is_reported() {
    let h = harness();
    let source = Signal::new(0i32);

    let s = source.clone();
    let _watcher = Watcher::builder(&h.scheduler, move || s.get())
        .expression("internal")
        .try_callback(|_, _| Err("broken".into()))
        .build()
        .unwrap();

    source.set(1).unwrap();
    h.ticks.run_pending();

    let errors = h.recorder.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.contains("broken"));
}

/// Test that the updated hook fires for mounted owners whose primary
/// watcher ran, children before parents.
#[test]
fn updated_hooks_follow_reverse_run_order() {
    let h = harness();
    let source = Signal::new(0i32);
    let parent = Owner::new("parent");
    let child = Owner::new("child");
    parent.set_mounted(true);
    child.set_mounted(true);

    for owner in [&parent, &child] {
        let s = source.clone();
        Watcher::builder(&h.scheduler, move || s.get())
            .owner(owner)
            .primary(true)
            .build()
            .unwrap();
    }
    // A non-primary watcher never triggers the hook.
    let s = source.clone();
    Watcher::builder(&h.scheduler, move || s.get())
        .owner(&child)
        .user(true)
        .build()
        .unwrap();

    source.set(1).unwrap();
    h.ticks.run_pending();

    assert_eq!(
        *h.recorder.hooks.borrow(),
        vec![
            ("child".to_string(), LifecycleHook::Updated),
            ("parent".to_string(), LifecycleHook::Updated),
        ]
    );
}

/// Test that destroyed owners neither run watchers nor receive hooks.
#[test]
fn destroyed_owner_is_inert() {
    let h = harness();
    let source = Signal::new(0i32);
    let owner = Owner::new("gone");
    owner.set_mounted(true);
    let fired = Rc::new(Cell::new(false));

    let (s, flag) = (source.clone(), fired.clone());
    let watcher = Watcher::builder(&h.scheduler, move || s.get())
        .owner(&owner)
        .primary(true)
        .callback(move |_, _| flag.set(true))
        .build()
        .unwrap();
    assert_eq!(owner.watcher_count(), 1);

    owner.destroy();
    assert!(!watcher.is_active());
    assert_eq!(owner.watcher_count(), 0);
    assert_eq!(source.subscriber_count(), 0);

    source.set(1).unwrap();
    h.ticks.run_pending();
    assert!(!fired.get());
    assert!(h.recorder.hooks.borrow().is_empty());
}

/// Test that queued activations fire after the flush.
#[test]
fn activation_hooks_fire_after_flush() {
    let h = harness();
    let owner = Owner::new("tab");
    owner.set_inactive(true);

    h.scheduler.queue_activated(&owner);
    assert!(!owner.is_inactive());

    h.scheduler.flush().unwrap();
    assert_eq!(
        *h.recorder.hooks.borrow(),
        vec![("tab".to_string(), LifecycleHook::Activated)]
    );
}

/// Test that a computed composes into a watcher and only recomputes when
/// read after a change.
#[test]
fn computed_feeds_a_watcher() {
    let h = harness();
    let items = Signal::new(vec![1i32, 2, 3]);
    let evaluations = Rc::new(Cell::new(0));

    let (source, counter) = (items.clone(), evaluations.clone());
    let total = Computed::new(&h.scheduler, move || {
        counter.set(counter.get() + 1);
        source.get().iter().sum::<i32>()
    });

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (read, sink) = (total.clone(), seen.clone());
    let _watcher = Watcher::builder(&h.scheduler, move || read.get().unwrap_or_default())
        .callback(move |new, _| sink.borrow_mut().push(*new))
        .build()
        .unwrap();
    assert_eq!(evaluations.get(), 1);

    items.update(|v| v.push(4)).unwrap();
    items.update(|v| v.push(5)).unwrap();
    h.ticks.run_pending();

    assert_eq!(*seen.borrow(), vec![15]);
    assert_eq!(evaluations.get(), 2);
}

/// Test that sync flush mode flushes on the first enqueue.
#[test]
fn sync_flush_mode_from_config() {
    let config = SchedulerConfig::from_json(r#"{"flush_mode": "sync"}"#).unwrap();
    assert_eq!(config.max_update_count, 100);
    let h = harness_with(config);
    let source = Signal::new(0i32);
    let seen = Rc::new(Cell::new(0));

    let (s, sink) = (source.clone(), seen.clone());
    let _watcher = Watcher::builder(&h.scheduler, move || s.get())
        .callback(move |new, _| sink.set(*new))
        .build()
        .unwrap();

    source.set(5).unwrap();
    assert_eq!(seen.get(), 5);
    assert_eq!(h.ticks.pending(), 0);
    assert!(h.scheduler.flush_timestamp().is_some());
    assert!(current_flush_timestamp().is_some());
}

/// Test that mutations made by a hook start a new flush.
#[test]
fn hook_mutations_schedule_a_new_flush() {
    struct Bump {
        source: Signal<i32>,
    }

    impl HookDispatcher for Bump {
        fn call_hook(&self, _owner: &Rc<Owner>, _hook: LifecycleHook) {
            let next = self.source.get_untracked() + 1;
            if next < 3 {
                self.source.set(next).unwrap();
            }
        }
    }

    let ticks = Rc::new(TickQueue::new());
    let source = Signal::new(0i32);
    let scheduler = Scheduler::builder()
        .deferrer(ticks.clone())
        .hooks(Rc::new(Bump {
            source: source.clone(),
        }))
        .build();

    let owner = Owner::new("counter");
    owner.set_mounted(true);
    let runs = Rc::new(Cell::new(0));
    let (s, counter) = (source.clone(), runs.clone());
    let _render = Watcher::builder(&scheduler, move || {
        counter.set(counter.get() + 1);
        s.get()
    })
    .owner(&owner)
    .primary(true)
    .build()
    .unwrap();

    source.set(1).unwrap();
    // Flush for 1, whose hook writes 2, whose flush's hook stops.
    assert_eq!(ticks.run_pending(), 2);
    assert_eq!(source.get_untracked(), 2);
    assert_eq!(runs.get(), 3);
}

/// Test that the tokio deferrer flushes once the task yields.
#[tokio::test]
async fn tokio_deferrer_flushes_after_yield() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = Scheduler::builder()
                .deferrer(Rc::new(TokioDeferrer))
                .build();
            let source = Signal::new(0i32);
            let seen = Rc::new(Cell::new(0));

            let (s, sink) = (source.clone(), seen.clone());
            let _watcher = Watcher::builder(&scheduler, move || s.get())
                .callback(move |new, _| sink.set(*new))
                .build()
                .unwrap();

            source.set(1).unwrap();
            source.set(2).unwrap();
            assert_eq!(seen.get(), 0);

            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            assert_eq!(seen.get(), 2);
            assert!(!scheduler.is_waiting());
        })
        .await;
}
