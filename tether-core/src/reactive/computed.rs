//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its getter and caches the result.
//!
//! 2. When accessed again and nothing anywhere was written since (the global
//!    version has not moved), the cached value is returned immediately.
//!
//! 3. When a dependency changes, a subscribed computed is marked dirty and
//!    forwards the notification to its own subscribers.
//!
//! 4. On next access, the computed walks its dependencies in read order,
//!    refreshing upstream computeds, and recomputes only if a version moved.
//!
//! 5. Its own version is bumped only when the new value differs from the old
//!    one, so readers of an unchanged computed are not re-run.
//!
//! # Subscription
//!
//! A computed nobody subscribes to keeps its dependency Links detached and
//! falls back to the global version check. When the first subscriber
//! attaches, the computed attaches its own Links, and detaches them again
//! when the last one leaves.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::effect::DebuggerEvent;
use super::runtime::{Orphan, Runtime};
use super::subscriber::SubscriberId;
use crate::error::{BoxError, ReactiveError};
use crate::graph::{ComputedSlot, DepKey, DepNode, Key, SubFlags, SubKey, SubNode, TrackOp};

/// Type-erased evaluation entry point stored in the graph.
pub(crate) trait Evaluate {
    /// Run the getter and store the result. Returns whether the value changed.
    fn evaluate(&self) -> Result<bool, BoxError>;
}

type Getter<T> = Box<dyn Fn() -> Result<T, BoxError>>;

struct ComputedInner<T> {
    runtime: Runtime,
    key: SubKey,
    dep: DepKey,
    getter: Getter<T>,
    value: RefCell<Option<T>>,
}

impl<T: PartialEq> Evaluate for ComputedInner<T> {
    fn evaluate(&self) -> Result<bool, BoxError> {
        let next = (self.getter)()?;
        let mut value = self.value.borrow_mut();
        if value.as_ref() == Some(&next) {
            return Ok(false);
        }
        *value = Some(next);
        Ok(true)
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.runtime.dispose(Orphan::Computed(self.key));
    }
}

/// A cached value derived from other reactive state.
///
/// Cloning shares the cache. The computed is disposed when the last handle
/// is dropped.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::{Computed, Runtime, Signal};
///
/// let runtime = Runtime::new();
/// let count = Signal::new(&runtime, 2);
///
/// let c = count.clone();
/// let doubled = Computed::new(&runtime, move || c.get() * 2);
/// assert_eq!(doubled.get().unwrap(), 4);
///
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed from an infallible getter. Nothing runs until the
    /// first read.
    pub fn new<F>(runtime: &Runtime, f: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(runtime, Box::new(move || Ok::<T, BoxError>(f())))
    }

    /// Create a computed whose getter can fail.
    pub fn try_new<F, E>(runtime: &Runtime, f: F) -> Self
    where
        F: Fn() -> Result<T, E> + 'static,
        E: Into<BoxError>,
    {
        Self::build(runtime, Box::new(move || f().map_err(Into::into)))
    }

    fn build(runtime: &Runtime, getter: Getter<T>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let source: Weak<dyn Evaluate> = weak.clone();
            let mut graph = runtime.graph();
            let dep = graph.deps.insert(DepNode::default());
            let key = graph.subs.insert(SubNode::computed(ComputedSlot {
                dep,
                last_global_version: None,
                source,
            }));
            graph.deps[dep].computed = Some(key);

            ComputedInner {
                runtime: runtime.clone(),
                key,
                dep,
                getter,
                value: RefCell::new(None),
            }
        });
        Self { inner }
    }

    /// Read the value, re-evaluating if a dependency changed.
    ///
    /// Inside an effect or computed the read is tracked. If the getter fails,
    /// the previous value stays cached and the next read retries.
    pub fn get(&self) -> Result<T, ReactiveError> {
        let inner = &*self.inner;
        let runtime = &inner.runtime;

        let (link, hook) = {
            let mut graph = runtime.graph();
            let link = graph.track_dep(inner.dep);
            let hook = match (link, graph.active_sub) {
                (Some(_), Some(sub)) => graph.on_track_hook(sub).map(|hook| (sub, hook)),
                _ => None,
            };
            (link, hook)
        };
        if let Some((sub, hook)) = hook {
            hook(&DebuggerEvent::track(
                sub.into(),
                None,
                TrackOp::Get,
                Some(Key::from("value")),
            ));
        }

        runtime.refresh_computed(inner.key)?;
        if let Some(link) = link {
            runtime.graph().sync_link_version(link);
        }

        let value = inner.value.borrow().clone();
        value.ok_or(ReactiveError::CyclicRead {
            subscriber: self.id(),
        })
    }

    /// Read the value without creating a dependency.
    pub fn get_untracked(&self) -> Result<T, ReactiveError> {
        self.inner.runtime.untracked(|| self.get())
    }
}

impl<T> Computed<T> {
    pub fn id(&self) -> SubscriberId {
        self.inner.key.into()
    }

    /// Whether the next read has to verify the cached value.
    pub fn is_dirty(&self) -> bool {
        let flags = self.flags();
        flags.contains(SubFlags::DIRTY) || !flags.contains(SubFlags::EVALUATED)
    }

    /// Whether a value has ever been computed.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Whether the computed is attached to its dependencies, which happens
    /// while something subscribes to it.
    pub fn is_tracking(&self) -> bool {
        self.flags().contains(SubFlags::TRACKING)
    }

    pub fn flags(&self) -> SubFlags {
        self.inner
            .runtime
            .graph()
            .subs
            .get(self.inner.key)
            .map_or(SubFlags::empty(), |node| node.flags)
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.runtime.graph().dependency_count(self.inner.key)
    }

    /// Number of subscribers attached to this computed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.runtime.graph().attached_count(self.inner.dep)
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Computed");
        s.field("id", &self.id());
        match self.inner.value.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<evaluating>"),
        };
        s.finish()
    }
}

// ---- Tests ----
