//! Signal Implementation
//!
//! A Signal is the smallest reactive value: one slot on its own target.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    read is tracked as `(target, "value")`.
//!
//! 2. When a signal is set to a different value, the key is triggered and all
//!    subscribers are notified.
//!
//! 3. Setting an equal value is a no-op: nothing is notified.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use super::target::Target;
use crate::error::ReactiveError;
use crate::graph::{TargetId, TrackOp, TriggerOp};

const VALUE: &str = "value";

struct SignalInner<T> {
    target: Target,
    value: RefCell<T>,
}

/// A reactive value container.
///
/// Cloning shares the value. The signal's keys are released from the
/// registry when the last handle is dropped.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                target: Target::new(runtime),
                value: RefCell::new(value),
            }),
        }
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Set a new value, notifying subscribers if it changed.
    pub fn set(&self, value: T) -> Result<(), ReactiveError> {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return Ok(());
            }
            *current = value;
        }
        self.inner.target.trigger(TriggerOp::Set, VALUE)
    }

    /// Replace the value with one computed from the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), ReactiveError> {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }

    pub fn target(&self) -> TargetId {
        self.inner.target.id()
    }

    /// Number of subscribers attached to this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .target
            .runtime()
            .subscriber_count(self.target(), VALUE)
    }

    fn track(&self) {
        self.inner.target.track(TrackOp::Get, VALUE);
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("target", &self.inner.target.id())
            .field("value", &self.inner.value.try_borrow().ok())
            .finish()
    }
}

// ---- Tests ----
