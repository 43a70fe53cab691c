//! Target Registry
//!
//! Maps `(target, key)` pairs to the Dep that records their readers. Entries
//! are created lazily on the first tracked read and removed when the Dep loses
//! its last Link or when the owning target is released.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::DepKey;
use crate::config::{InvalidationPolicy, InvalidationScope};

/// Identity of an observed object.
///
/// The engine never looks inside a target; it only needs a stable identity
/// to group keys under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Allocate a new unique target identity.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// A reactive slot within a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A named property.
    Field(Cow<'static, str>),
    /// A positional element.
    Index(usize),
    /// The element count of a sequence-like target.
    Length,
    /// The set of keys of the target, read by iteration.
    Iterate,
}

impl From<&'static str> for Key {
    fn from(name: &'static str) -> Self {
        Key::Field(Cow::Borrowed(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(Cow::Owned(name))
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => f.write_str(name),
            Key::Index(index) => write!(f, "[{index}]"),
            Key::Length => f.write_str("<length>"),
            Key::Iterate => f.write_str("<iterate>"),
        }
    }
}

/// Read-like operations reported through `track`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// Mutating operations reported through `trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

/// Lookup table from target identity to its per-key Deps.
#[derive(Debug, Default)]
pub(crate) struct TargetMap {
    targets: HashMap<TargetId, IndexMap<Key, DepKey>>,
}

impl TargetMap {
    pub(crate) fn get(&self, target: TargetId, key: &Key) -> Option<DepKey> {
        self.targets.get(&target)?.get(key).copied()
    }

    pub(crate) fn insert(&mut self, target: TargetId, key: Key, dep: DepKey) {
        self.targets.entry(target).or_default().insert(key, dep);
    }

    /// Remove the entry only if it still points at `dep`.
    pub(crate) fn remove(&mut self, target: TargetId, key: &Key, dep: DepKey) {
        let Some(keys) = self.targets.get_mut(&target) else {
            return;
        };
        if keys.get(key) == Some(&dep) {
            keys.shift_remove(key);
        }
        if keys.is_empty() {
            self.targets.remove(&target);
        }
    }

    pub(crate) fn release(&mut self, target: TargetId) -> Option<IndexMap<Key, DepKey>> {
        self.targets.remove(&target)
    }

    #[cfg(test)]
    pub(crate) fn contains_target(&self, target: TargetId) -> bool {
        self.targets.contains_key(&target)
    }

    /// Resolve the Deps a trigger reaches under `policy`.
    ///
    /// Returns `None` when the target has no registry entry at all.
    pub(crate) fn collect(
        &self,
        target: TargetId,
        op: TriggerOp,
        key: Option<&Key>,
        policy: &InvalidationPolicy,
    ) -> Option<SmallVec<[DepKey; 4]>> {
        let keys = self.targets.get(&target)?;
        let mut deps = SmallVec::new();

        match (policy.scope(op), key) {
            (_, None) | (InvalidationScope::Target, _) => {
                deps.extend(keys.values().copied());
            }
            (InvalidationScope::Key, Some(key)) => {
                deps.extend(keys.get(key).copied());
            }
            (InvalidationScope::KeyAndIteration, Some(key)) => {
                deps.extend(keys.get(key).copied());
                if *key != Key::Iterate {
                    deps.extend(keys.get(&Key::Iterate).copied());
                }
                if matches!(key, Key::Index(_)) {
                    deps.extend(keys.get(&Key::Length).copied());
                }
            }
        }

        Some(deps)
    }
}
