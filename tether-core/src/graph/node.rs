//! Graph Nodes
//!
//! This module defines the records that live in the graph arenas: Deps
//! (reactive slots) and subscriber nodes (effects and computeds).

use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use super::registry::{Key, TargetId};
use super::{DepKey, LinkKey, SubKey};
use crate::error::BoxError;
use crate::reactive::{EffectHooks, Evaluate, SubscriberKind};

bitflags! {
    /// Lifecycle and scheduling state of a subscriber.
    ///
    /// The flags are independent; any combination may be set at once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SubFlags: u8 {
        /// Alive and eligible to run.
        const ACTIVE        = 1 << 0;
        /// Currently executing its function.
        const RUNNING       = 1 << 1;
        /// Links are attached to the subscriber lists of its Deps.
        const TRACKING      = 1 << 2;
        /// Already queued in the current batch.
        const NOTIFIED      = 1 << 3;
        /// Must be verified before the cached value is trusted.
        const DIRTY         = 1 << 4;
        /// May be notified while running.
        const ALLOW_RECURSE = 1 << 5;
        /// Notifications are deferred until resumed.
        const PAUSED        = 1 << 6;
        /// A computed holds a value produced by a successful evaluation.
        const EVALUATED     = 1 << 7;
    }
}

/// One reactive slot: a key on a target, or a computed's output.
#[derive(Debug, Default)]
pub(crate) struct DepNode {
    /// Bumped on every trigger (or on every changed computed value).
    pub(crate) version: u64,
    /// Oldest subscriber Link.
    pub(crate) subs_head: Option<LinkKey>,
    /// Newest subscriber Link. Notification walks from here.
    pub(crate) subs_tail: Option<LinkKey>,
    /// Number of live Links pointing at this Dep, attached or not.
    pub(crate) sc: usize,
    /// Link of the subscriber currently reading this Dep.
    pub(crate) active_link: Option<LinkKey>,
    /// The computed whose output this Dep represents.
    pub(crate) computed: Option<SubKey>,
    /// Registry position for key Deps.
    pub(crate) owner: Option<(TargetId, Key)>,
}

impl DepNode {
    pub(crate) fn for_key(target: TargetId, key: Key) -> Self {
        Self {
            owner: Some((target, key)),
            ..Self::default()
        }
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        self.subs_tail.is_some()
    }
}

pub(crate) type EffectBody = Rc<dyn Fn() -> Result<(), BoxError>>;

/// Effect state that involves user closures.
pub(crate) struct EffectSlot {
    pub(crate) body: EffectBody,
    pub(crate) hooks: Rc<EffectHooks>,
    pub(crate) cleanups: Vec<Box<dyn FnOnce()>>,
}

pub(crate) struct ComputedSlot {
    /// The Dep other subscribers link to when they read this computed.
    pub(crate) dep: DepKey,
    /// Global version observed at the last freshness check.
    pub(crate) last_global_version: Option<u64>,
    pub(crate) source: Weak<dyn Evaluate>,
}

pub(crate) enum SubKind {
    Effect(EffectSlot),
    Computed(ComputedSlot),
}

/// A subscriber record: anything that owns a list of dependency Links.
pub(crate) struct SubNode {
    pub(crate) flags: SubFlags,
    pub(crate) deps_head: Option<LinkKey>,
    pub(crate) deps_tail: Option<LinkKey>,
    /// Intrusive batch queue link. Cleared when dequeued.
    pub(crate) next: Option<SubKey>,
    pub(crate) kind: SubKind,
}

impl SubNode {
    pub(crate) fn effect(slot: EffectSlot, allow_recurse: bool) -> Self {
        let mut flags = SubFlags::ACTIVE | SubFlags::TRACKING;
        flags.set(SubFlags::ALLOW_RECURSE, allow_recurse);
        Self {
            flags,
            deps_head: None,
            deps_tail: None,
            next: None,
            kind: SubKind::Effect(slot),
        }
    }

    /// Computeds start dirty and untracked; they subscribe upstream only once
    /// something subscribes to them.
    pub(crate) fn computed(slot: ComputedSlot) -> Self {
        Self {
            flags: SubFlags::DIRTY,
            deps_head: None,
            deps_tail: None,
            next: None,
            kind: SubKind::Computed(slot),
        }
    }

    pub(crate) fn kind(&self) -> SubscriberKind {
        match self.kind {
            SubKind::Effect(_) => SubscriberKind::Effect,
            SubKind::Computed(_) => SubscriberKind::Computed,
        }
    }

    pub(crate) fn effect_slot(&self) -> Option<&EffectSlot> {
        match &self.kind {
            SubKind::Effect(slot) => Some(slot),
            SubKind::Computed(_) => None,
        }
    }

    pub(crate) fn effect_slot_mut(&mut self) -> Option<&mut EffectSlot> {
        match &mut self.kind {
            SubKind::Effect(slot) => Some(slot),
            SubKind::Computed(_) => None,
        }
    }

    pub(crate) fn computed_slot_mut(&mut self) -> Option<&mut ComputedSlot> {
        match &mut self.kind {
            SubKind::Computed(slot) => Some(slot),
            SubKind::Effect(_) => None,
        }
    }
}

impl fmt::Debug for SubNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubNode")
            .field("kind", &self.kind())
            .field("flags", &self.flags)
            .field("deps_head", &self.deps_head)
            .field("deps_tail", &self.deps_tail)
            .field("next", &self.next)
            .finish()
    }
}
