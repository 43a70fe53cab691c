//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued in the current batch
//!    and runs once when the outermost batch closes.
//!
//! 3. A queued effect first checks whether it is really dirty: a dependency
//!    that is a computed only counts if it re-evaluated to a different value.
//!
//! 4. Each run re-confirms the Links it reads; Links not read again are
//!    pruned when the run finishes.
//!
//! # Cleanup
//!
//! Closures registered with [`Runtime::on_effect_cleanup`] during a run are
//! called before the next run and when the effect stops, with tracking
//! disabled.

use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::runtime::Runtime;
use super::subscriber::SubscriberId;
use crate::error::{EffectOutput, ReactiveError};
use crate::graph::{
    EffectBody, EffectSlot, Key, SubFlags, SubKey, SubNode, TargetId, TrackOp, TriggerOp,
};

/// Custom scheduling for an effect's notifications.
///
/// Called in place of the default "run if dirty" when the effect is notified.
pub type Scheduler = Rc<dyn Fn(&Effect) -> Result<(), ReactiveError>>;

/// A value captured for a debugger event.
pub type DebugValue = Rc<dyn fmt::Debug>;

/// Which operation a [`DebuggerEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Track(TrackOp),
    Trigger(TriggerOp),
}

/// Values a writer can attach to a trigger for `on_trigger` hooks.
#[derive(Debug, Clone, Default)]
pub struct TriggerValues {
    pub new_value: Option<DebugValue>,
    pub old_value: Option<DebugValue>,
    /// Previous contents of a cleared collection.
    pub old_target: Option<DebugValue>,
}

impl TriggerValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_value(mut self, value: impl fmt::Debug + 'static) -> Self {
        self.new_value = Some(Rc::new(value));
        self
    }

    pub fn old_value(mut self, value: impl fmt::Debug + 'static) -> Self {
        self.old_value = Some(Rc::new(value));
        self
    }

    pub fn old_target(mut self, value: impl fmt::Debug + 'static) -> Self {
        self.old_target = Some(Rc::new(value));
        self
    }
}

/// Passed to `on_track` and `on_trigger` hooks.
#[derive(Debug, Clone)]
pub struct DebuggerEvent {
    /// The effect the hook belongs to.
    pub subscriber: SubscriberId,
    /// `None` when the Dep is a computed's output.
    pub target: Option<TargetId>,
    pub kind: OpKind,
    pub key: Option<Key>,
    pub new_value: Option<DebugValue>,
    pub old_value: Option<DebugValue>,
    pub old_target: Option<DebugValue>,
}

impl DebuggerEvent {
    pub(crate) fn track(
        subscriber: SubscriberId,
        target: Option<TargetId>,
        op: TrackOp,
        key: Option<Key>,
    ) -> Self {
        Self {
            subscriber,
            target,
            kind: OpKind::Track(op),
            key,
            new_value: None,
            old_value: None,
            old_target: None,
        }
    }

    pub(crate) fn trigger(
        subscriber: SubscriberId,
        target: TargetId,
        op: TriggerOp,
        key: Option<Key>,
        values: &TriggerValues,
    ) -> Self {
        Self {
            subscriber,
            target: Some(target),
            kind: OpKind::Trigger(op),
            key,
            new_value: values.new_value.clone(),
            old_value: values.old_value.clone(),
            old_target: values.old_target.clone(),
        }
    }
}

pub(crate) type DebugHook = Rc<dyn Fn(&DebuggerEvent)>;

/// An `on_trigger` hook paired with the subscriber it belongs to.
pub(crate) type DebuggerHook = (SubKey, DebugHook);

/// User hooks attached to one effect.
#[derive(Default)]
pub(crate) struct EffectHooks {
    pub(crate) scheduler: Option<Scheduler>,
    pub(crate) on_stop: Option<Rc<dyn Fn()>>,
    pub(crate) on_track: Option<DebugHook>,
    pub(crate) on_trigger: Option<DebugHook>,
}

/// Options for [`Effect::with_options`] and [`Effect::new_lazy`].
#[derive(Default)]
pub struct EffectOptions {
    allow_recurse: bool,
    hooks: EffectHooks,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default "run if dirty" reaction to notifications.
    pub fn scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn(&Effect) -> Result<(), ReactiveError> + 'static,
    {
        self.hooks.scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Let the effect be re-queued by writes it makes while running.
    pub fn allow_recurse(mut self, allow: bool) -> Self {
        self.allow_recurse = allow;
        self
    }

    pub fn on_stop(mut self, f: impl Fn() + 'static) -> Self {
        self.hooks.on_stop = Some(Rc::new(f));
        self
    }

    pub fn on_track(mut self, f: impl Fn(&DebuggerEvent) + 'static) -> Self {
        self.hooks.on_track = Some(Rc::new(f));
        self
    }

    pub fn on_trigger(mut self, f: impl Fn(&DebuggerEvent) + 'static) -> Self {
        self.hooks.on_trigger = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("allow_recurse", &self.allow_recurse)
            .field("scheduler", &self.hooks.scheduler.is_some())
            .finish_non_exhaustive()
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Handles are cheap to clone. Dropping a handle does not stop the effect;
/// call [`Effect::stop`].
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::{Effect, Runtime, Signal};
///
/// let runtime = Runtime::new();
/// let count = Signal::new(&runtime, 0);
///
/// let c = count.clone();
/// let effect = Effect::new(&runtime, move || {
///     println!("Count is: {}", c.get());
/// })
/// .unwrap();
///
/// count.set(5).unwrap(); // Prints: "Count is: 5"
/// effect.stop();
/// ```
#[derive(Clone)]
pub struct Effect {
    runtime: Runtime,
    key: SubKey,
    body: EffectBody,
}

impl Effect {
    /// Create an effect and run it immediately to establish dependencies.
    ///
    /// If the first run fails the effect is stopped and the error returned.
    pub fn new<F, R>(runtime: &Runtime, f: F) -> Result<Self, ReactiveError>
    where
        F: Fn() -> R + 'static,
        R: EffectOutput,
    {
        Self::with_options(runtime, f, EffectOptions::default())
    }

    pub fn with_options<F, R>(
        runtime: &Runtime,
        f: F,
        options: EffectOptions,
    ) -> Result<Self, ReactiveError>
    where
        F: Fn() -> R + 'static,
        R: EffectOutput,
    {
        let effect = Self::new_lazy(runtime, f, options);
        if let Err(err) = effect.run() {
            debug!(sub = %effect.id(), error = %err, "effect setup failed");
            effect.stop();
            return Err(err);
        }
        Ok(effect)
    }

    /// Create an effect without running it.
    ///
    /// It has no dependencies until [`Effect::run`] is called.
    pub fn new_lazy<F, R>(runtime: &Runtime, f: F, options: EffectOptions) -> Self
    where
        F: Fn() -> R + 'static,
        R: EffectOutput,
    {
        let body: EffectBody = Rc::new(move || f().into_result());
        let slot = EffectSlot {
            body: body.clone(),
            hooks: Rc::new(options.hooks),
            cleanups: Vec::new(),
        };
        let key = runtime
            .graph()
            .subs
            .insert(SubNode::effect(slot, options.allow_recurse));

        Self {
            runtime: runtime.clone(),
            key,
            body,
        }
    }

    pub(crate) fn from_parts(runtime: Runtime, key: SubKey, body: EffectBody) -> Self {
        Self { runtime, key, body }
    }

    pub fn id(&self) -> SubscriberId {
        self.key.into()
    }

    /// Run the function now, re-collecting dependencies.
    ///
    /// A stopped effect runs its function once without tracking.
    pub fn run(&self) -> Result<(), ReactiveError> {
        self.runtime.run_effect(self.key, &*self.body)
    }

    /// React to a notification the way the batch drain does.
    pub fn trigger(&self) -> Result<(), ReactiveError> {
        self.runtime.trigger_effect(self.key)
    }

    /// Run only if a dependency actually changed.
    pub fn run_if_dirty(&self) -> Result<(), ReactiveError> {
        if self.is_dirty()? {
            self.run()
        } else {
            Ok(())
        }
    }

    /// Whether a dependency changed since the last run.
    ///
    /// Refreshes upstream computeds, which may run their getters.
    pub fn is_dirty(&self) -> Result<bool, ReactiveError> {
        self.runtime.is_dirty(self.key)
    }

    /// Unlink from all dependencies and run cleanups. Idempotent.
    pub fn stop(&self) {
        self.runtime.stop_effect(self.key);
    }

    /// Hold notifications until [`Effect::resume`].
    pub fn pause(&self) {
        let mut graph = self.runtime.graph();
        if let Some(node) = graph.subs.get_mut(self.key) {
            if node.flags.contains(SubFlags::ACTIVE) {
                node.flags.insert(SubFlags::PAUSED);
            }
        }
    }

    /// Stop holding notifications, triggering once if any arrived.
    pub fn resume(&self) -> Result<(), ReactiveError> {
        let pending = {
            let mut guard = self.runtime.graph();
            let graph = &mut *guard;
            match graph.subs.get_mut(self.key) {
                Some(node) if node.flags.contains(SubFlags::PAUSED) => {
                    node.flags.remove(SubFlags::PAUSED);
                    graph.batch.paused.shift_remove(&self.key)
                }
                _ => false,
            }
        };
        if pending {
            self.trigger()
        } else {
            Ok(())
        }
    }

    pub fn is_active(&self) -> bool {
        self.flags().contains(SubFlags::ACTIVE)
    }

    pub fn is_paused(&self) -> bool {
        self.flags().contains(SubFlags::PAUSED)
    }

    /// Current flags; empty once a stopped effect has been reclaimed.
    pub fn flags(&self) -> SubFlags {
        self.runtime
            .graph()
            .subs
            .get(self.key)
            .map_or(SubFlags::empty(), |node| node.flags)
    }

    /// Number of distinct Deps read by the last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime.graph().dependency_count(self.key)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

// ---- Tests ----
