//! Reactive targets.
//!
//! A target is the identity that keys are tracked and triggered under. The
//! registry holds one key table per target; [`Target`] owns a fresh identity
//! and releases its table when dropped.

use std::fmt;

use super::effect::TriggerValues;
use super::runtime::{Orphan, Runtime};
use crate::error::ReactiveError;
use crate::graph::{Key, TargetId, TrackOp, TriggerOp};

/// Owned target identity bound to a runtime.
pub struct Target {
    runtime: Runtime,
    id: TargetId,
}

impl Target {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            id: TargetId::new(),
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn track(&self, op: TrackOp, key: impl Into<Key>) {
        self.runtime.track(self.id, op, key);
    }

    pub fn trigger(&self, op: TriggerOp, key: impl Into<Key>) -> Result<(), ReactiveError> {
        self.runtime.trigger(self.id, op, Some(key.into()))
    }

    pub fn trigger_with(
        &self,
        op: TriggerOp,
        key: Option<Key>,
        values: TriggerValues,
    ) -> Result<(), ReactiveError> {
        self.runtime.trigger_with(self.id, op, key, values)
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        self.runtime.dispose(Orphan::Target(self.id));
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Target").field(&self.id).finish()
    }
}
