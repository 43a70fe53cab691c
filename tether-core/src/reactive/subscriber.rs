//! Subscriber types for the reactive system.
//!
//! A subscriber is anything that depends on Deps: an effect or a computed.
//! Both live in the same arena and share the notification contract; the
//! variant decides what a notification means.

use std::fmt;

use slotmap::Key as _;

use crate::graph::{DepKey, SubKey};

/// Unique identifier for a subscriber.
///
/// Identifiers are arena keys, so they are unique within one runtime and are
/// never reused for a different subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(SubKey);

impl From<SubKey> for SubscriberId {
    fn from(key: SubKey) -> Self {
        Self(key)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Low half of the ffi form is the slot index; the high half is the
        // slot generation.
        let raw = self.0.data().as_ffi();
        write!(f, "sub#{}v{}", raw & 0xffff_ffff, raw >> 32)
    }
}

/// Which kind of subscriber a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberKind {
    /// Re-runs a side-effecting function.
    Effect,
    /// Caches a derived value and is itself a Dep.
    Computed,
}

/// Outcome of delivering a notification to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notified {
    /// Nothing further to do.
    Handled,
    /// The subscriber is a computed that was just marked dirty; the caller
    /// must notify the computed's own Dep.
    PropagateToOwnDep(DepKey),
}
