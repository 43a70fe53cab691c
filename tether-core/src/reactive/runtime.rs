//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects targets, computeds,
//! and effects. It owns the dependency graph and schedules updates when a
//! tracked key is written.
//!
//! # How It Works
//!
//! 1. When an effect or computed reads `(target, key)` through
//!    [`Runtime::track`], the runtime links the key's Dep to the active
//!    subscriber.
//!
//! 2. When `(target, key)` is written, [`Runtime::trigger`]:
//!    a. Resolves the Deps affected by the operation
//!    b. Bumps their versions and the global version
//!    c. Marks dependent computeds dirty and queues effects
//!    d. Closes the batch, which runs the queued effects
//!
//! 3. Computeds are lazy. They recompute on the next read, and only if a
//!    dependency's version actually moved.
//!
//! # Borrowing
//!
//! All graph state sits behind one `RefCell`. The runtime never holds that
//! borrow while user code runs: every operation copies out what it needs,
//! releases the graph, then calls the closure. Handles dropped while the graph
//! is borrowed record an [`Orphan`] that is cleaned up on the next access.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::computed::Evaluate;
use super::context::{ActiveScope, BatchScope, DrainScope, SuspendScope, TrackingGuard};
use super::effect::{DebuggerEvent, DebuggerHook, Effect, TriggerValues};
use super::subscriber::SubscriberId;
use crate::config::RuntimeConfig;
use crate::error::{BoxError, ReactiveError};
use crate::graph::{Graph, Key, SubFlags, SubKey, SubKind, TargetId, TrackOp, TriggerOp};

/// Cleanup deferred because the graph was borrowed when a handle dropped.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Orphan {
    Computed(SubKey),
    Target(TargetId),
}

struct RuntimeInner {
    graph: RefCell<Graph>,
    orphans: RefCell<Vec<Orphan>>,
    config: RuntimeConfig,
}

/// Handle to one reactive graph.
///
/// Cloning is cheap and every clone refers to the same graph. Runtimes are
/// independent of each other: a subscriber created on one never observes
/// writes made through another.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.graph.try_borrow() {
            Ok(graph) => f
                .debug_struct("Runtime")
                .field("deps", &graph.deps.len())
                .field("links", &graph.links.len())
                .field("subscribers", &graph.subs.len())
                .field("global_version", &graph.global_version)
                .finish(),
            Err(_) => f.debug_struct("Runtime").finish_non_exhaustive(),
        }
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                graph: RefCell::new(Graph::new()),
                orphans: RefCell::new(Vec::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- Tracking ----

    /// Record that the active subscriber read `key` on `target`.
    ///
    /// Does nothing when no subscriber is running or tracking is paused.
    pub fn track(&self, target: TargetId, op: TrackOp, key: impl Into<Key>) {
        let key = key.into();
        let hook = {
            let mut graph = self.graph();
            if !graph.should_track {
                return;
            }
            let Some(sub) = graph.active_sub else {
                return;
            };
            if !graph.subs.contains_key(sub) {
                return;
            }
            let dep = graph.key_dep(target, key.clone());
            graph.track_dep(dep);
            trace!(%target, %key, ?op, sub = %SubscriberId::from(sub), "tracked read");
            graph.on_track_hook(sub).map(|hook| (sub, hook))
        };

        if let Some((sub, hook)) = hook {
            hook(&DebuggerEvent::track(sub.into(), Some(target), op, Some(key)));
        }
    }

    /// Record a write to `key` on `target` and run whatever depends on it.
    ///
    /// `key: None` means the whole target. Returns the first error raised by
    /// an effect that ran as a result.
    pub fn trigger(
        &self,
        target: TargetId,
        op: TriggerOp,
        key: Option<Key>,
    ) -> Result<(), ReactiveError> {
        self.trigger_with(target, op, key, TriggerValues::default())
    }

    /// [`Runtime::trigger`] with values forwarded to `on_trigger` hooks.
    pub fn trigger_with(
        &self,
        target: TargetId,
        op: TriggerOp,
        key: Option<Key>,
        values: TriggerValues,
    ) -> Result<(), ReactiveError> {
        let deps = {
            let mut graph = self.graph();
            let deps = graph
                .registry
                .collect(target, op, key.as_ref(), &self.inner.config.invalidation)
                .unwrap_or_default();

            if deps.is_empty() {
                // Never tracked: only bump the global version so untracked
                // computeds re-check on their next read.
                graph.global_version += 1;
                trace!(%target, ?op, "trigger with no dependents");
                return Ok(());
            }
            deps
        };

        trace!(%target, ?op, key = ?key, deps = deps.len(), "triggering");
        let scope = BatchScope::enter(self);
        let mut hooks: Vec<DebuggerHook> = Vec::new();
        {
            let mut graph = self.graph();
            for dep in deps {
                graph.trigger_dep(dep, &mut hooks);
            }
        }

        for (sub, hook) in hooks {
            hook(&DebuggerEvent::trigger(
                sub.into(),
                target,
                op,
                key.clone(),
                &values,
            ));
        }

        scope.close()
    }

    // ---- Batching ----

    /// Open a batch. Effects notified before the matching
    /// [`Runtime::end_batch`] run once, when the outermost batch closes.
    pub fn start_batch(&self) {
        self.graph().batch.depth += 1;
    }

    /// Close a batch, draining queued effects if it was the outermost one.
    ///
    /// Every queued effect runs even if an earlier one fails; the first error
    /// is returned and later ones are logged.
    pub fn end_batch(&self) -> Result<(), ReactiveError> {
        {
            let mut graph = self.graph();
            if graph.batch.depth > 1 {
                graph.batch.depth -= 1;
                return Ok(());
            }
        }

        // The depth stays at one while draining so writes made by the
        // effects queue up instead of starting a nested drain.
        let drain = DrainScope::enter(self);
        let mut first: Option<ReactiveError> = None;
        let mut ran = 0usize;
        loop {
            let next = {
                let mut graph = self.graph();
                graph.pop_effect().map(|sub| {
                    let active = graph
                        .subs
                        .get(sub)
                        .is_some_and(|node| node.flags.contains(SubFlags::ACTIVE));
                    (sub, active)
                })
            };
            let Some((sub, active)) = next else {
                break;
            };
            if !active {
                let reclaimed = self.graph().reclaim_if_stopped(sub);
                drop(reclaimed);
                continue;
            }

            ran += 1;
            if let Err(err) = self.trigger_effect(sub) {
                if first.is_none() {
                    first = Some(err);
                } else {
                    warn!(error = %err, "discarding error from batched effect");
                }
            }
        }
        drop(drain);

        if ran > 0 {
            debug!(effects = ran, "batch drained");
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run `f` inside a batch.
    ///
    /// When an effect drained at the end of the batch fails, the error is
    /// returned and `f`'s result is dropped; whatever `f` wrote stays written.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        let scope = BatchScope::enter(self);
        let result = f();
        scope.close()?;
        Ok(result)
    }

    // ---- Tracking control ----

    pub fn global_version(&self) -> u64 {
        self.graph().global_version
    }

    /// Stop recording reads until the matching [`Runtime::reset_tracking`].
    pub fn pause_tracking(&self) {
        let mut graph = self.graph();
        let prev = graph.should_track;
        graph.track_stack.push(prev);
        graph.should_track = false;
    }

    /// Record reads again until the matching [`Runtime::reset_tracking`].
    pub fn enable_tracking(&self) {
        let mut graph = self.graph();
        let prev = graph.should_track;
        graph.track_stack.push(prev);
        graph.should_track = true;
    }

    /// Undo the last `pause_tracking` or `enable_tracking`.
    pub fn reset_tracking(&self) {
        let mut graph = self.graph();
        graph.should_track = graph.track_stack.pop().unwrap_or(true);
    }

    /// Run `f` without recording any reads.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = TrackingGuard::paused(self);
        f()
    }

    /// Register `f` to run before the current effect's next run and when it
    /// stops. Returns `false` if no effect is running.
    pub fn on_effect_cleanup(&self, f: impl FnOnce() + 'static) -> bool {
        let mut graph = self.graph();
        let active = graph.active_sub;
        let slot = active
            .and_then(|sub| graph.subs.get_mut(sub))
            .and_then(|node| node.effect_slot_mut());
        match slot {
            Some(slot) => {
                slot.cleanups.push(Box::new(f));
                true
            }
            None => {
                warn!("on_effect_cleanup called outside of an effect");
                false
            }
        }
    }

    // ---- Targets and diagnostics ----

    /// Forget every key registered under `target`.
    ///
    /// Deps still linked by a subscriber survive until that subscriber drops
    /// the Link.
    pub fn release_target(&self, target: TargetId) {
        self.graph().release_target(target);
        trace!(%target, "target released");
    }

    /// Number of subscribers attached to `(target, key)`.
    pub fn subscriber_count(&self, target: TargetId, key: impl Into<Key>) -> usize {
        let key = key.into();
        let graph = self.graph();
        graph
            .registry
            .get(target, &key)
            .map_or(0, |dep| graph.attached_count(dep))
    }

    /// Whether `(target, key)` has a Dep in the registry.
    pub fn is_tracked(&self, target: TargetId, key: impl Into<Key>) -> bool {
        self.graph().registry.get(target, &key.into()).is_some()
    }

    /// The subscriber whose reads are currently being recorded.
    pub fn active_subscriber(&self) -> Option<SubscriberId> {
        self.graph().active_sub.map(SubscriberId::from)
    }

    // ---- Crate internals ----

    /// Borrow the graph, first applying cleanups deferred by earlier drops.
    pub(crate) fn graph(&self) -> RefMut<'_, Graph> {
        let mut graph = self.inner.graph.borrow_mut();
        let orphans = std::mem::take(&mut *self.inner.orphans.borrow_mut());
        for orphan in orphans {
            apply_orphan(&mut graph, orphan);
        }
        graph
    }

    /// Like [`Runtime::graph`], but `None` if the graph is already borrowed.
    /// Used by guards that may run while unwinding.
    pub(crate) fn try_graph(&self) -> Option<RefMut<'_, Graph>> {
        let mut graph = self.inner.graph.try_borrow_mut().ok()?;
        if let Ok(mut orphans) = self.inner.orphans.try_borrow_mut() {
            for orphan in orphans.drain(..) {
                apply_orphan(&mut graph, orphan);
            }
        }
        Some(graph)
    }

    /// Apply a cleanup now, or defer it if the graph is borrowed.
    pub(crate) fn dispose(&self, orphan: Orphan) {
        match self.inner.graph.try_borrow_mut() {
            Ok(mut graph) => apply_orphan(&mut graph, orphan),
            Err(_) => self.inner.orphans.borrow_mut().push(orphan),
        }
    }

    /// Whether any dependency of `sub` moved since it last ran.
    ///
    /// Upstream computeds are refreshed along the way, so a computed that
    /// re-evaluated to an equal value does not count as a change.
    pub(crate) fn is_dirty(&self, sub: SubKey) -> Result<bool, ReactiveError> {
        let snapshot = self.graph().dep_snapshot(sub);
        for (dep, seen) in snapshot {
            let Some((version, computed)) = self
                .graph()
                .deps
                .get(dep)
                .map(|node| (node.version, node.computed))
            else {
                continue;
            };
            if seen != Some(version) {
                return Ok(true);
            }
            if let Some(computed) = computed {
                self.refresh_computed(computed)?;
                let version = self.graph().deps.get(dep).map(|node| node.version);
                if version != seen {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Bring a computed's cached value up to date.
    ///
    /// A moved global version always leads to the walk over the computed's
    /// Links. The computed is marked fresh only once that walk (and any
    /// re-evaluation) succeeded.
    pub(crate) fn refresh_computed(&self, sub: SubKey) -> Result<(), ReactiveError> {
        let (source, evaluated, global) = {
            let mut guard = self.graph();
            let graph = &mut *guard;
            let global = graph.global_version;
            let Some(node) = graph.subs.get(sub) else {
                return Ok(());
            };
            if node.flags.contains(SubFlags::RUNNING) {
                return Ok(());
            }
            let evaluated = node.flags.contains(SubFlags::EVALUATED);
            let SubKind::Computed(slot) = &node.kind else {
                return Ok(());
            };
            if evaluated && slot.last_global_version == Some(global) {
                return Ok(());
            }
            let Some(source) = slot.source.upgrade() else {
                return Ok(());
            };
            // The value is about to reflect every write so far; the next write
            // has to reach this computed's readers again.
            graph.dequeue(sub);
            (source, evaluated, global)
        };

        let stale = if evaluated {
            match self.is_dirty(sub) {
                Ok(stale) => stale,
                Err(err) => {
                    self.graph().mark_failed(sub);
                    return Err(err);
                }
            }
        } else {
            true
        };
        if stale {
            self.evaluate_computed(sub, source.as_ref())?;
        }

        let mut graph = self.graph();
        if let Some(node) = graph.subs.get_mut(sub) {
            node.flags.remove(SubFlags::DIRTY);
            if let Some(slot) = node.computed_slot_mut() {
                slot.last_global_version = Some(global);
            }
        }
        Ok(())
    }

    fn evaluate_computed(&self, sub: SubKey, getter: &dyn Evaluate) -> Result<(), ReactiveError> {
        {
            let mut graph = self.graph();
            if let Some(node) = graph.subs.get_mut(sub) {
                // Restored on success; a getter that unwinds leaves the
                // computed to be evaluated again.
                node.flags.insert(SubFlags::RUNNING);
                node.flags.remove(SubFlags::EVALUATED);
            }
            graph.prepare_deps(sub);
        }
        debug!(sub = %SubscriberId::from(sub), "evaluating computed");

        let result = {
            let _scope = ActiveScope::enter(self, sub);
            getter.evaluate()
        };

        let mut guard = self.graph();
        let graph = &mut *guard;
        match result {
            Ok(changed) => {
                let Some(node) = graph.subs.get_mut(sub) else {
                    return Ok(());
                };
                node.flags.insert(SubFlags::EVALUATED);
                let own = node.computed_slot_mut().map(|slot| slot.dep);
                if let (true, Some(own)) = (changed, own) {
                    if let Some(dep) = graph.deps.get_mut(own) {
                        dep.version += 1;
                    }
                }
                Ok(())
            }
            Err(source) => {
                graph.mark_failed(sub);
                Err(ReactiveError::Computed {
                    subscriber: sub.into(),
                    source,
                })
            }
        }
    }

    /// Run an effect's body as a tracked run.
    ///
    /// An inactive effect runs its body untracked, once.
    pub(crate) fn run_effect(
        &self,
        sub: SubKey,
        body: &dyn Fn() -> Result<(), BoxError>,
    ) -> Result<(), ReactiveError> {
        let fail = |source: BoxError| ReactiveError::Effect {
            subscriber: sub.into(),
            source,
        };

        let cleanups = {
            let mut graph = self.graph();
            graph
                .subs
                .get_mut(sub)
                .filter(|node| node.flags.contains(SubFlags::ACTIVE))
                .and_then(|node| node.effect_slot_mut())
                .map(|slot| std::mem::take(&mut slot.cleanups))
        };
        let Some(cleanups) = cleanups else {
            return body().map_err(fail);
        };
        self.run_suspended(cleanups);

        let started = {
            let mut graph = self.graph();
            let started = match graph.subs.get_mut(sub) {
                Some(node) if node.flags.contains(SubFlags::ACTIVE) => {
                    node.flags.insert(SubFlags::RUNNING);
                    true
                }
                _ => false,
            };
            if started {
                graph.prepare_deps(sub);
            }
            started
        };
        if !started {
            // A cleanup stopped the effect.
            return body().map_err(fail);
        }

        trace!(sub = %SubscriberId::from(sub), "running effect");
        let _scope = ActiveScope::enter(self, sub);
        body().map_err(fail)
    }

    /// Deliver a batched notification to an effect.
    pub(crate) fn trigger_effect(&self, sub: SubKey) -> Result<(), ReactiveError> {
        let parts = {
            let mut guard = self.graph();
            let graph = &mut *guard;
            let Some(node) = graph.subs.get(sub) else {
                return Ok(());
            };
            if node.flags.contains(SubFlags::PAUSED) {
                graph.batch.paused.insert(sub);
                trace!(sub = %SubscriberId::from(sub), "deferred trigger of paused effect");
                return Ok(());
            }
            node.effect_slot()
                .map(|slot| (slot.hooks.scheduler.clone(), slot.body.clone()))
        };
        let Some((scheduler, body)) = parts else {
            return Ok(());
        };

        let effect = Effect::from_parts(self.clone(), sub, body);
        match scheduler {
            Some(scheduler) => scheduler(&effect),
            None => effect.run_if_dirty(),
        }
    }

    /// Deactivate an effect, unlink it, and run its cleanups and `on_stop`.
    pub(crate) fn stop_effect(&self, sub: SubKey) {
        let (cleanups, hooks, reclaimed) = {
            let mut guard = self.graph();
            let graph = &mut *guard;
            let Some(node) = graph.subs.get_mut(sub) else {
                return;
            };
            if !node.flags.contains(SubFlags::ACTIVE) {
                return;
            }
            node.flags.remove(SubFlags::ACTIVE | SubFlags::PAUSED);
            let (cleanups, hooks) = match node.effect_slot_mut() {
                Some(slot) => (std::mem::take(&mut slot.cleanups), Some(slot.hooks.clone())),
                None => (Vec::new(), None),
            };
            graph.teardown_deps(sub);
            graph.dequeue(sub);
            graph.batch.paused.shift_remove(&sub);
            (cleanups, hooks, graph.reclaim_if_stopped(sub))
        };
        debug!(sub = %SubscriberId::from(sub), "effect stopped");

        self.run_suspended(cleanups);
        if let Some(on_stop) = hooks.as_ref().and_then(|hooks| hooks.on_stop.as_ref()) {
            on_stop();
        }
        drop(reclaimed);
    }

    /// Run closures with no active subscriber and tracking paused.
    pub(crate) fn run_suspended(&self, fns: Vec<Box<dyn FnOnce()>>) {
        if fns.is_empty() {
            return;
        }
        let _suspended = SuspendScope::enter(self);
        let _paused = TrackingGuard::paused(self);
        for f in fns {
            f();
        }
    }
}

fn apply_orphan(graph: &mut Graph, orphan: Orphan) {
    match orphan {
        Orphan::Computed(sub) => graph.dispose_computed(sub),
        Orphan::Target(target) => graph.release_target(target),
    }
}
