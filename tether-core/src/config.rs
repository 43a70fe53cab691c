//! Runtime Configuration
//!
//! The only tunable behavior of the engine is how far a single write reaches
//! inside its target: just the written key, the key plus the target's
//! iteration slots, or every key registered for the target.
//!
//! Configuration is plain data and deserializes with serde, so it can be
//! loaded from whatever format the embedding application already uses.

use serde::{Deserialize, Serialize};

use crate::graph::TriggerOp;

/// How many Deps of a target a single trigger invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    /// Only the written key. A trigger without a key falls back to `Target`.
    Key,
    /// The written key, the `Iterate` slot, and `Length` for index keys.
    KeyAndIteration,
    /// Every Dep registered under the target.
    Target,
}

/// Per-operation invalidation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationPolicy {
    pub set: InvalidationScope,
    pub add: InvalidationScope,
    pub delete: InvalidationScope,
    pub clear: InvalidationScope,
}

impl InvalidationPolicy {
    /// Every operation invalidates the whole target.
    pub fn coarse() -> Self {
        Self {
            set: InvalidationScope::Target,
            add: InvalidationScope::Target,
            delete: InvalidationScope::Target,
            clear: InvalidationScope::Target,
        }
    }

    /// Scope applied to a trigger of the given kind.
    pub fn scope(&self, op: TriggerOp) -> InvalidationScope {
        match op {
            TriggerOp::Set => self.set,
            TriggerOp::Add => self.add,
            TriggerOp::Delete => self.delete,
            TriggerOp::Clear => self.clear,
        }
    }
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self {
            set: InvalidationScope::Key,
            add: InvalidationScope::KeyAndIteration,
            delete: InvalidationScope::KeyAndIteration,
            clear: InvalidationScope::Target,
        }
    }
}

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub invalidation: InvalidationPolicy,
}
