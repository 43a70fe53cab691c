//! Integration Tests for Reactive System
//!
//! These tests verify that targets, computeds, and effects work together
//! correctly through the public API.

use std::cell::{Cell, RefCell};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tether_core::reactive::{
    Computed, DebuggerEvent, Effect, EffectOptions, OpKind, Runtime, Signal, TriggerValues,
};
use tether_core::{
    InvalidationPolicy, Key, ReactiveError, RuntimeConfig, TargetId, TrackOp, TriggerOp,
};

fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
    let count = Rc::new(Cell::new(0));
    (count.clone(), count)
}

fn bump(count: &Cell<u32>) {
    count.set(count.get() + 1);
}

/// Reading the same key several times in one run links it once, so a write
/// re-runs the effect exactly once.
#[test]
fn repeated_reads_notify_once() {
    let runtime = Runtime::new();
    let target = TargetId::new();
    let (runs, runs_clone) = counter();

    let rt = runtime.clone();
    let effect = Effect::new(&runtime, move || {
        bump(&runs_clone);
        for _ in 0..3 {
            rt.track(target, TrackOp::Get, "k");
        }
    })
    .unwrap();

    assert_eq!(effect.dependency_count(), 1);
    assert_eq!(runtime.subscriber_count(target, "k"), 1);

    runtime.trigger(target, TriggerOp::Set, Some("k".into())).unwrap();
    assert_eq!(runs.get(), 2);
}

/// Reading a computed twice with no writes in between evaluates it once and
/// returns the same value.
#[test]
fn computed_global_version_fast_path() {
    let runtime = Runtime::new();
    let source = Signal::new(&runtime, 3);
    let (evals, evals_clone) = counter();

    let s = source.clone();
    let tripled = Computed::new(&runtime, move || {
        bump(&evals_clone);
        s.get() * 3
    });

    let version = runtime.global_version();
    assert_eq!(tripled.get().unwrap(), 9);
    assert_eq!(tripled.get().unwrap(), 9);
    assert_eq!(evals.get(), 1);
    assert_eq!(runtime.global_version(), version);
}

/// A stopped effect is unsubscribed from everything it read.
#[test]
fn stopped_effect_is_never_called_again() {
    let runtime = Runtime::new();
    let a = Signal::new(&runtime, 0);
    let b = Signal::new(&runtime, 0);
    let (runs, runs_clone) = counter();

    let (a2, b2) = (a.clone(), b.clone());
    let effect = Effect::new(&runtime, move || {
        bump(&runs_clone);
        a2.get();
        b2.get();
    })
    .unwrap();

    effect.stop();
    a.set(1).unwrap();
    b.set(1).unwrap();

    assert_eq!(runs.get(), 1);
    assert_eq!(a.subscriber_count(), 0);
    assert_eq!(b.subscriber_count(), 0);
    assert!(!effect.is_active());
}

/// A dependency that a later run no longer reads stops triggering.
#[test]
fn unread_dependency_is_pruned() {
    let runtime = Runtime::new();
    let toggle = Signal::new(&runtime, true);
    let a = Signal::new(&runtime, 0);
    let b = Signal::new(&runtime, 0);
    let (runs, runs_clone) = counter();

    let (t, a2, b2) = (toggle.clone(), a.clone(), b.clone());
    let effect = Effect::new(&runtime, move || {
        bump(&runs_clone);
        if t.get() {
            a2.get();
        } else {
            b2.get();
        }
    })
    .unwrap();
    assert_eq!(runs.get(), 1);

    toggle.set(false).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(effect.dependency_count(), 2);

    // `a` was not read during the second run
    a.set(1).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(a.subscriber_count(), 0);

    b.set(1).unwrap();
    assert_eq!(runs.get(), 3);
}

/// Three writes inside one batch run each dependent effect once.
#[test]
fn batched_writes_run_each_effect_once() {
    let runtime = Runtime::new();
    let source = Signal::new(&runtime, 0);
    let (first, first_clone) = counter();
    let (second, second_clone) = counter();

    let s = source.clone();
    let _e1 = Effect::new(&runtime, move || {
        bump(&first_clone);
        s.get();
    })
    .unwrap();
    let s = source.clone();
    let _e2 = Effect::new(&runtime, move || {
        bump(&second_clone);
        s.get();
    })
    .unwrap();

    runtime.start_batch();
    source.set(1).unwrap();
    source.set(2).unwrap();
    source.set(3).unwrap();
    assert_eq!((first.get(), second.get()), (1, 1));
    runtime.end_batch().unwrap();

    assert_eq!((first.get(), second.get()), (2, 2));
}

/// Writing an equal value is not a change.
#[test]
fn unchanged_write_does_not_notify() {
    let runtime = Runtime::new();
    let d = Signal::new(&runtime, 1);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (d2, seen_clone) = (d.clone(), seen.clone());
    let _effect = Effect::new(&runtime, move || {
        seen_clone.borrow_mut().push(d2.get());
    })
    .unwrap();

    d.set(1).unwrap();
    assert_eq!(*seen.borrow(), vec![1]);

    d.set(2).unwrap();
    assert_eq!(*seen.borrow(), vec![1, 2]);
}

/// `C = D * 2` with no subscribers: each read after a write evaluates once.
#[test]
fn unsubscribed_computed_recomputes_once_per_change() {
    let runtime = Runtime::new();
    let d = Signal::new(&runtime, 1);
    let (evals, evals_clone) = counter();

    let d2 = d.clone();
    let c = Computed::new(&runtime, move || {
        bump(&evals_clone);
        d2.get() * 2
    });

    assert_eq!(c.get().unwrap(), 2);
    assert_eq!(evals.get(), 1);

    d.set(5).unwrap();
    assert_eq!(c.get().unwrap(), 10);
    assert_eq!(evals.get(), 2);
    assert!(!c.is_tracking());
}

/// An effect whose first run fails is stopped and never runs again.
#[test]
fn failing_first_run_leaves_effect_inactive() {
    let runtime = Runtime::new();
    let d = Signal::new(&runtime, 0);
    let (runs, runs_clone) = counter();

    let d2 = d.clone();
    let result = Effect::new(&runtime, move || -> Result<(), io::Error> {
        bump(&runs_clone);
        d2.get();
        Err(io::Error::new(io::ErrorKind::Other, "setup failed"))
    });

    assert!(matches!(result, Err(ReactiveError::Effect { .. })));
    d.set(1).unwrap();
    d.set(2).unwrap();
    assert_eq!(runs.get(), 1);
    assert_eq!(d.subscriber_count(), 0);
}

/// Same failure through a lazily constructed effect, where the handle stays
/// observable.
#[test]
fn failing_run_then_stop_clears_active_flag() {
    let runtime = Runtime::new();
    let effect = Effect::new_lazy(
        &runtime,
        || -> Result<(), io::Error> { Err(io::Error::new(io::ErrorKind::Other, "nope")) },
        EffectOptions::default(),
    );
    assert!(effect.is_active());

    assert!(effect.run().is_err());
    effect.stop();

    assert!(!effect.is_active());
}

/// One failing effect does not stop its siblings; the first error is
/// reported once the drain completes.
#[test]
fn first_error_wins_and_siblings_still_run() {
    let runtime = Runtime::new();
    let d = Signal::new(&runtime, 0);
    let (ok_runs, ok_clone) = counter();

    let d2 = d.clone();
    let failing = Effect::new(&runtime, move || -> Result<(), io::Error> {
        if d2.get() > 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "first"));
        }
        Ok(())
    })
    .unwrap();
    let d2 = d.clone();
    let _second_failing = Effect::new(&runtime, move || -> Result<(), io::Error> {
        if d2.get() > 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "second"));
        }
        Ok(())
    })
    .unwrap();
    let d2 = d.clone();
    let _healthy = Effect::new(&runtime, move || {
        bump(&ok_clone);
        d2.get();
    })
    .unwrap();

    let err = d.set(1).unwrap_err();

    assert_eq!(err.subscriber(), failing.id());
    assert_eq!(ok_runs.get(), 2);
    // A failed run keeps its subscriptions
    assert_eq!(d.subscriber_count(), 3);
}

/// A computed that re-evaluates to the same value does not re-run readers.
#[test]
fn unchanged_computed_does_not_rerun_effect() {
    let runtime = Runtime::new();
    let d = Signal::new(&runtime, 1);
    let (runs, runs_clone) = counter();

    let d2 = d.clone();
    let parity = Computed::new(&runtime, move || d2.get() % 2);
    let p = parity.clone();
    let _effect = Effect::new(&runtime, move || {
        bump(&runs_clone);
        p.get().unwrap();
    })
    .unwrap();

    d.set(3).unwrap();
    assert_eq!(runs.get(), 1);

    d.set(4).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(parity.get().unwrap(), 0);
}

/// A chain of computeds propagates a write through every level.
#[test]
fn computed_chain_propagates() {
    let runtime = Runtime::new();
    let base = Signal::new(&runtime, 5);

    let b = base.clone();
    let doubled = Computed::new(&runtime, move || b.get() * 2);
    let d = doubled.clone();
    let plus_ten = Computed::try_new(&runtime, move || d.get().map(|v| v + 10));

    let seen = Rc::new(Cell::new(0));
    let (p, seen_clone) = (plus_ten.clone(), seen.clone());
    let effect = Effect::new(&runtime, move || -> Result<(), ReactiveError> {
        seen_clone.set(p.get()?);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen.get(), 20);

    base.set(10).unwrap();
    assert_eq!(seen.get(), 30);
    assert_eq!(doubled.get().unwrap(), 20);

    // The effect depends on the outer computed only
    assert_eq!(effect.dependency_count(), 1);
    assert!(doubled.is_tracking());
    assert_eq!(base.subscriber_count(), 1);
}

/// Reading a chained computed between writes in one batch keeps both the
/// read and the drained effect current.
#[test]
fn chained_computed_read_between_batched_writes() {
    let runtime = Runtime::new();
    let source = Signal::new(&runtime, 1);

    let s = source.clone();
    let doubled = Computed::new(&runtime, move || s.get() * 2);
    let d = doubled.clone();
    let plus_one = Computed::try_new(&runtime, move || d.get().map(|v| v + 1));

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (p, seen_clone) = (plus_one.clone(), seen.clone());
    let _effect = Effect::new(&runtime, move || -> Result<(), ReactiveError> {
        seen_clone.borrow_mut().push(p.get()?);
        Ok(())
    })
    .unwrap();

    runtime.start_batch();
    source.set(2).unwrap();
    let mid = plus_one.get().unwrap();
    source.set(3).unwrap();
    let after = plus_one.get().unwrap();
    runtime.end_batch().unwrap();

    assert_eq!((mid, after), (5, 7));
    assert_eq!(*seen.borrow(), vec![3, 7]);
}

/// An effect reading a chained computed while other effects in the same
/// drain keep writing its source sees every write.
#[test]
fn chained_computed_follows_writes_within_one_drain() {
    let runtime = Runtime::new();
    let trigger = Signal::new(&runtime, 0);
    let source = Signal::new(&runtime, 0);

    let s = source.clone();
    let doubled = Computed::new(&runtime, move || s.get() * 2);
    let d = doubled.clone();
    let plus_one = Computed::try_new(&runtime, move || d.get().map(|v| v + 1));

    let (t, s) = (trigger.clone(), source.clone());
    let _copy = Effect::new(&runtime, move || -> Result<(), ReactiveError> {
        s.set(t.get())
    })
    .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (t, p, seen_clone) = (trigger.clone(), plus_one.clone(), seen.clone());
    let _reader = Effect::new(&runtime, move || -> Result<(), ReactiveError> {
        t.get();
        seen_clone.borrow_mut().push(p.get()?);
        Ok(())
    })
    .unwrap();

    let (t, s) = (trigger.clone(), source.clone());
    let _scale = Effect::new(&runtime, move || -> Result<(), ReactiveError> {
        s.set(t.get() * 10)
    })
    .unwrap();

    trigger.set(1).unwrap();

    assert_eq!(seen.borrow().last(), Some(&21));
    assert_eq!(plus_one.get().unwrap(), 21);
}

/// An effect that panics during a drain does not wedge the runtime.
#[test]
fn panicking_effect_leaves_runtime_usable() {
    let runtime = Runtime::new();
    let flaky = Signal::new(&runtime, 0);
    let other = Signal::new(&runtime, 0);

    let f = flaky.clone();
    let _panicky = Effect::new(&runtime, move || {
        if f.get() == 1 {
            panic!("effect failed");
        }
    })
    .unwrap();

    let (runs, runs_clone) = counter();
    let o = other.clone();
    let _steady = Effect::new(&runtime, move || {
        bump(&runs_clone);
        o.get();
    })
    .unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(|| flaky.set(1)));
    assert!(outcome.is_err());

    other.set(1).unwrap();
    assert_eq!(runs.get(), 2);
    assert!(runtime.active_subscriber().is_none());
}

/// Two paths from one source into one effect still run it once per write.
#[test]
fn diamond_runs_effect_once() {
    let runtime = Runtime::new();
    let source = Signal::new(&runtime, 1);
    let (runs, runs_clone) = counter();

    let s = source.clone();
    let left = Computed::new(&runtime, move || s.get() + 1);
    let s = source.clone();
    let right = Computed::new(&runtime, move || s.get() * 10);

    let (l, r) = (left.clone(), right.clone());
    let sum = Rc::new(Cell::new(0));
    let sum_clone = sum.clone();
    let _effect = Effect::new(&runtime, move || -> Result<(), ReactiveError> {
        bump(&runs_clone);
        sum_clone.set(l.get()? + r.get()?);
        Ok(())
    })
    .unwrap();

    source.set(2).unwrap();

    assert_eq!(runs.get(), 2);
    assert_eq!(sum.get(), 23);
}

/// An effect that writes what it reads is not re-entered unless allowed.
#[test]
fn self_write_is_ignored_without_allow_recurse() {
    let runtime = Runtime::new();
    let count = Signal::new(&runtime, 0);
    let (runs, runs_clone) = counter();

    let c = count.clone();
    let _effect = Effect::new(&runtime, move || -> Result<(), ReactiveError> {
        bump(&runs_clone);
        let value = c.get();
        if value < 3 {
            c.set(value + 1)?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(runs.get(), 1);
    assert_eq!(count.get_untracked(), 1);
}

#[test]
fn allow_recurse_lets_effect_settle() {
    let runtime = Runtime::new();
    let count = Signal::new(&runtime, 0);
    let (runs, runs_clone) = counter();

    let c = count.clone();
    let effect = Effect::with_options(
        &runtime,
        move || -> Result<(), ReactiveError> {
            bump(&runs_clone);
            let value = c.get();
            if value < 3 {
                c.set(value + 1)?;
            }
            Ok(())
        },
        EffectOptions::new().allow_recurse(true),
    )
    .unwrap();

    assert_eq!(count.get_untracked(), 3);
    assert_eq!(runs.get(), 4);
    assert_eq!(effect.dependency_count(), 1);
}

/// A scheduler receives the effect and decides when it runs.
#[test]
fn scheduler_defers_runs() {
    let runtime = Runtime::new();
    let d = Signal::new(&runtime, 0);
    let queue: Rc<RefCell<Vec<Effect>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::new(Cell::new(-1));

    let (d2, seen_clone, q) = (d.clone(), seen.clone(), queue.clone());
    let _effect = Effect::with_options(
        &runtime,
        move || seen_clone.set(d2.get()),
        EffectOptions::new().scheduler(move |effect| {
            q.borrow_mut().push(effect.clone());
            Ok(())
        }),
    )
    .unwrap();
    assert_eq!(seen.get(), 0);

    d.set(7).unwrap();
    assert_eq!(seen.get(), 0);
    assert_eq!(queue.borrow().len(), 1);

    let jobs: Vec<Effect> = queue.borrow_mut().drain(..).collect();
    for job in jobs {
        job.run().unwrap();
    }
    assert_eq!(seen.get(), 7);
}

/// Writes to a paused effect's dependencies are remembered and flushed once
/// on resume.
#[test]
fn pause_defers_until_resume() {
    let runtime = Runtime::new();
    let d = Signal::new(&runtime, 0);
    let (runs, runs_clone) = counter();

    let d2 = d.clone();
    let effect = Effect::new(&runtime, move || {
        bump(&runs_clone);
        d2.get();
    })
    .unwrap();

    effect.pause();
    assert!(effect.is_paused());
    d.set(1).unwrap();
    d.set(2).unwrap();
    assert_eq!(runs.get(), 1);

    effect.resume().unwrap();
    assert_eq!(runs.get(), 2);

    d.set(3).unwrap();
    assert_eq!(runs.get(), 3);
}

/// `on_track` and `on_trigger` see the target, operation, key and values.
#[test]
fn debugger_hooks_receive_events() {
    let runtime = Runtime::new();
    let target = TargetId::new();
    let tracked: Rc<RefCell<Vec<DebuggerEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let triggered: Rc<RefCell<Vec<DebuggerEvent>>> = Rc::new(RefCell::new(Vec::new()));

    let (rt, tracked_clone, triggered_clone) =
        (runtime.clone(), tracked.clone(), triggered.clone());
    let effect = Effect::with_options(
        &runtime,
        move || rt.track(target, TrackOp::Get, "name"),
        EffectOptions::new()
            .on_track(move |event| tracked_clone.borrow_mut().push(event.clone()))
            .on_trigger(move |event| triggered_clone.borrow_mut().push(event.clone())),
    )
    .unwrap();

    {
        let tracked = tracked.borrow();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].subscriber, effect.id());
        assert_eq!(tracked[0].target, Some(target));
        assert_eq!(tracked[0].kind, OpKind::Track(TrackOp::Get));
        assert_eq!(tracked[0].key, Some(Key::from("name")));
    }

    runtime
        .trigger_with(
            target,
            TriggerOp::Set,
            Some("name".into()),
            TriggerValues::new().new_value("b").old_value("a"),
        )
        .unwrap();

    let triggered = triggered.borrow();
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].kind, OpKind::Trigger(TriggerOp::Set));
    let new_value = triggered[0].new_value.as_ref().map(|v| format!("{v:?}"));
    let old_value = triggered[0].old_value.as_ref().map(|v| format!("{v:?}"));
    assert_eq!(new_value.as_deref(), Some("\"b\""));
    assert_eq!(old_value.as_deref(), Some("\"a\""));
}

/// Under the default policy a set only reaches readers of that key, while
/// structural operations reach iteration and length readers too.
#[test]
fn default_policy_scopes_invalidation() {
    let runtime = Runtime::new();
    let list = TargetId::new();
    let (index_runs, index_clone) = counter();
    let (iter_runs, iter_clone) = counter();
    let (len_runs, len_clone) = counter();

    let rt = runtime.clone();
    let _index = Effect::new(&runtime, move || {
        bump(&index_clone);
        rt.track(list, TrackOp::Get, 0usize);
    })
    .unwrap();
    let rt = runtime.clone();
    let _iter = Effect::new(&runtime, move || {
        bump(&iter_clone);
        rt.track(list, TrackOp::Iterate, Key::Iterate);
    })
    .unwrap();
    let rt = runtime.clone();
    let _len = Effect::new(&runtime, move || {
        bump(&len_clone);
        rt.track(list, TrackOp::Get, Key::Length);
    })
    .unwrap();

    runtime.trigger(list, TriggerOp::Set, Some(1usize.into())).unwrap();
    assert_eq!((index_runs.get(), iter_runs.get(), len_runs.get()), (1, 1, 1));

    runtime.trigger(list, TriggerOp::Add, Some(1usize.into())).unwrap();
    assert_eq!((index_runs.get(), iter_runs.get(), len_runs.get()), (1, 2, 2));

    runtime.trigger(list, TriggerOp::Clear, None).unwrap();
    assert_eq!((index_runs.get(), iter_runs.get(), len_runs.get()), (2, 3, 3));
}

/// The coarse policy invalidates every key of the target on any write.
#[test]
fn coarse_policy_invalidates_target() {
    let runtime = Runtime::with_config(RuntimeConfig {
        invalidation: InvalidationPolicy::coarse(),
    });
    let target = TargetId::new();
    let (runs, runs_clone) = counter();

    let rt = runtime.clone();
    let _effect = Effect::new(&runtime, move || {
        bump(&runs_clone);
        rt.track(target, TrackOp::Get, "a");
    })
    .unwrap();

    runtime.trigger(target, TriggerOp::Set, Some("b".into())).unwrap();
    assert_eq!(runs.get(), 2);
}

/// Writes made by an effect during a drain are picked up in the same drain.
#[test]
fn effect_writes_cascade_within_one_drain() {
    let runtime = Runtime::new();
    let input = Signal::new(&runtime, 1);
    let mirror = Signal::new(&runtime, 0);
    let seen = Rc::new(Cell::new(0));

    let (i, m) = (input.clone(), mirror.clone());
    let _copy = Effect::new(&runtime, move || m.set(i.get())).unwrap();
    let (m, seen_clone) = (mirror.clone(), seen.clone());
    let _observe = Effect::new(&runtime, move || seen_clone.set(m.get())).unwrap();
    assert_eq!(seen.get(), 1);

    input.set(42).unwrap();
    assert_eq!(seen.get(), 42);
}

/// Cleanups registered during a run fire before the next run, untracked.
#[test]
fn cleanups_run_untracked_before_rerun() {
    let runtime = Runtime::new();
    let d = Signal::new(&runtime, 0);
    let other = Signal::new(&runtime, 0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let (rt, d2, other2, log_clone) = (runtime.clone(), d.clone(), other.clone(), log.clone());
    let effect = Effect::new(&runtime, move || {
        let value = d2.get();
        log_clone.borrow_mut().push(format!("run {value}"));
        let (log_clone, other2) = (log_clone.clone(), other2.clone());
        rt.on_effect_cleanup(move || {
            // Reads inside a cleanup are not dependencies
            other2.get();
            log_clone.borrow_mut().push(format!("cleanup {value}"));
        });
    })
    .unwrap();

    d.set(1).unwrap();
    effect.stop();

    assert_eq!(
        *log.borrow(),
        vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
    );
    assert_eq!(other.subscriber_count(), 0);
}

/// Reads inside a nested computed evaluation are attributed to the computed,
/// and the outer effect resumes tracking its own reads afterwards.
#[test]
fn nested_evaluation_attributes_reads() {
    let runtime = Runtime::new();
    let inner_source = Signal::new(&runtime, 1);
    let outer_source = Signal::new(&runtime, 2);

    let s = inner_source.clone();
    let derived = Computed::new(&runtime, move || s.get() + 1);

    let (d, o) = (derived.clone(), outer_source.clone());
    let effect = Effect::new(&runtime, move || -> Result<(), ReactiveError> {
        d.get()?;
        o.get();
        Ok(())
    })
    .unwrap();

    assert_eq!(effect.dependency_count(), 2);
    assert_eq!(derived.dependency_count(), 1);
    assert_eq!(outer_source.subscriber_count(), 1);
    assert_eq!(inner_source.subscriber_count(), 1);
    assert!(runtime.active_subscriber().is_none());
}
