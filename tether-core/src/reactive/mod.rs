//! Reactive Primitives
//!
//! This module implements the user-facing side of the engine: the runtime,
//! effects, computeds, and the `Signal` collaborator built on `track` and
//! `trigger`.
//!
//! # Concepts
//!
//! ## Targets and keys
//!
//! Reactive state is addressed as `(target, key)`. Whoever owns the state
//! calls [`Runtime::track`] when a key is read and [`Runtime::trigger`] when
//! it is written. [`Signal`] is the smallest such owner.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changed, and it only notifies downstream when
//! its value actually changed.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Writes are batched: an effect notified several times
//! in one batch runs once.
//!
//! # Implementation Notes
//!
//! Dependencies are collected automatically. While an effect or computed
//! runs, it is the runtime's active subscriber, and every tracked read links
//! the Dep being read to it. The links are reconciled at the end of each run,
//! so a dependency that is no longer read stops notifying.

mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;
mod target;

pub use computed::Computed;
pub use effect::{
    DebugValue, DebuggerEvent, Effect, EffectOptions, OpKind, Scheduler, TriggerValues,
};
pub use runtime::Runtime;
pub use signal::Signal;
pub use subscriber::{SubscriberId, SubscriberKind};
pub use target::Target;

pub(crate) use computed::Evaluate;
pub(crate) use effect::{DebuggerHook, EffectHooks};
pub(crate) use subscriber::Notified;
