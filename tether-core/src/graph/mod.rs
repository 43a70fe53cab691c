//! Dependency Graph
//!
//! This module holds the data side of the engine: Deps, Links, subscriber
//! nodes, the target registry and the batch queues. Nothing in here calls
//! user code, so every operation runs to completion under one mutable borrow
//! of the [`Graph`].
//!
//! # Overview
//!
//! The graph is a set of three arenas addressed by stable slotmap keys:
//!
//! - Deps are reactive slots. Each owns a doubly-linked list of subscriber
//!   Links and a version counter.
//! - Subscribers (effects and computeds) each own a doubly-linked list of
//!   dependency Links built up during one run.
//! - Links are the edges. A Link sits in both lists at once, so it can be
//!   removed from either side in O(1).
//!
//! Deps and subscribers refer to each other only through keys, so the cyclic
//! Dep <-> Link <-> Subscriber structure involves no owning references.
//!
//! # Versions
//!
//! Every trigger bumps the Dep's version and a graph-wide global version.
//! Links remember the Dep version they last observed, and computeds remember
//! the global version of their last freshness check. Comparing the two lets a
//! computed skip re-evaluation when nothing it reads has moved.

mod link;
mod node;
mod registry;
mod scheduler;

use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};
use tracing::trace;

pub use node::SubFlags;
pub use registry::{Key, TargetId, TrackOp, TriggerOp};

pub(crate) use link::Link;
pub(crate) use node::{ComputedSlot, DepNode, EffectBody, EffectSlot, SubKind, SubNode};
pub(crate) use registry::TargetMap;
pub(crate) use scheduler::BatchQueue;

use crate::reactive::{DebuggerEvent, DebuggerHook, Notified};

new_key_type! {
    /// Arena key of a Dep.
    pub struct DepKey;
    /// Arena key of a Link.
    pub struct LinkKey;
    /// Arena key of a subscriber node.
    pub struct SubKey;
}

/// The mutable state of one runtime.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    pub(crate) deps: SlotMap<DepKey, DepNode>,
    pub(crate) links: SlotMap<LinkKey, Link>,
    pub(crate) subs: SlotMap<SubKey, SubNode>,
    pub(crate) registry: TargetMap,
    pub(crate) global_version: u64,
    /// The subscriber whose reads are being recorded.
    pub(crate) active_sub: Option<SubKey>,
    pub(crate) should_track: bool,
    pub(crate) track_stack: Vec<bool>,
    pub(crate) batch: BatchQueue,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self {
            should_track: true,
            ..Self::default()
        }
    }

    /// Find or create the Dep for `(target, key)`.
    pub(crate) fn key_dep(&mut self, target: TargetId, key: Key) -> DepKey {
        if let Some(dep) = self.registry.get(target, &key) {
            return dep;
        }
        let dep = self.deps.insert(DepNode::for_key(target, key.clone()));
        self.registry.insert(target, key, dep);
        dep
    }

    /// Bump the Dep's version and the global version, then notify.
    ///
    /// The caller must hold a batch open so that queued effects run only once
    /// the whole trigger has been propagated.
    pub(crate) fn trigger_dep(&mut self, dep: DepKey, hooks: &mut Vec<DebuggerHook>) {
        let Some(node) = self.deps.get_mut(dep) else {
            return;
        };
        node.version += 1;
        self.global_version += 1;
        trace!(dep = ?dep, version = node.version, "dep triggered");
        self.notify_dep(dep, hooks);
    }

    /// Walk the subscriber list newest to oldest and notify each subscriber.
    ///
    /// A computed answers [`Notified::PropagateToOwnDep`] and its own Dep is
    /// notified from here, so each computed level costs one extra frame.
    pub(crate) fn notify_dep(&mut self, dep: DepKey, hooks: &mut Vec<DebuggerHook>) {
        let Some(node) = self.deps.get(dep) else {
            return;
        };

        // Debug hooks observe subscribers in subscription order.
        let mut cursor = node.subs_head;
        while let Some(link) = cursor {
            let link = &self.links[link];
            cursor = link.next_sub;
            if let Some(hook) = self.subs.get(link.sub).and_then(|sub| {
                sub.effect_slot()
                    .and_then(|slot| slot.hooks.on_trigger.clone())
            }) {
                hooks.push((link.sub, hook));
            }
        }

        let mut cursor = self.deps[dep].subs_tail;
        while let Some(link) = cursor {
            let (sub, prev) = {
                let link = &self.links[link];
                (link.sub, link.prev_sub)
            };
            cursor = prev;
            if let Notified::PropagateToOwnDep(own) = self.notify_sub(sub) {
                self.notify_dep(own, hooks);
            }
        }
    }

    /// Deliver one notification to a subscriber.
    pub(crate) fn notify_sub(&mut self, sub: SubKey) -> Notified {
        let active = self.active_sub;
        let Some(node) = self.subs.get_mut(sub) else {
            return Notified::Handled;
        };

        let own = match &node.kind {
            SubKind::Effect(_) => None,
            SubKind::Computed(slot) => Some(slot.dep),
        };
        let flags = node.flags;

        match own {
            None => {
                if flags.contains(SubFlags::RUNNING) && !flags.contains(SubFlags::ALLOW_RECURSE) {
                    trace!(sub = ?sub, "ignoring notification of running effect");
                    return Notified::Handled;
                }
                if !flags.contains(SubFlags::NOTIFIED) {
                    self.enqueue(sub, false);
                }
                Notified::Handled
            }
            Some(own) => {
                node.flags.insert(SubFlags::DIRTY);
                if !flags.contains(SubFlags::NOTIFIED) && active != Some(sub) {
                    self.enqueue(sub, true);
                    Notified::PropagateToOwnDep(own)
                } else {
                    Notified::Handled
                }
            }
        }
    }

    /// Remove a subscriber node that is no longer reachable.
    ///
    /// Stopped effects are kept while running or queued; the node is returned
    /// so the caller can drop user closures after releasing the graph borrow.
    pub(crate) fn reclaim_if_stopped(&mut self, sub: SubKey) -> Option<SubNode> {
        let node = self.subs.get(sub)?;
        let reclaimable = matches!(node.kind, SubKind::Effect(_))
            && !node
                .flags
                .intersects(SubFlags::ACTIVE | SubFlags::RUNNING | SubFlags::NOTIFIED);
        if reclaimable {
            self.subs.remove(sub)
        } else {
            None
        }
    }

    /// Drop a computed's node and its own Dep.
    pub(crate) fn dispose_computed(&mut self, sub: SubKey) {
        let Some(node) = self.subs.get(sub) else {
            return;
        };
        let own = match &node.kind {
            SubKind::Computed(slot) => slot.dep,
            SubKind::Effect(_) => return,
        };

        self.teardown_deps(sub);
        self.dequeue(sub);
        self.subs.remove(sub);

        // Readers keep their Links until their next run prunes them; detach
        // them here so nothing walks into the removed Dep.
        let mut cursor = self.deps.get(own).and_then(|dep| dep.subs_head);
        while let Some(link) = cursor {
            let link = &mut self.links[link];
            cursor = link.next_sub;
            link.prev_sub = None;
            link.next_sub = None;
            link.attached = false;
        }
        self.deps.remove(own);
    }

    /// Leave a computed whose getter failed ready to retry on the next read.
    /// The cached value is not touched.
    pub(crate) fn mark_failed(&mut self, sub: SubKey) {
        let Some(node) = self.subs.get_mut(sub) else {
            return;
        };
        node.flags.insert(SubFlags::DIRTY);
        node.flags.remove(SubFlags::EVALUATED);
        if let Some(slot) = node.computed_slot_mut() {
            slot.last_global_version = None;
        }
    }

    /// The `on_track` hook of an effect, if it has one.
    pub(crate) fn on_track_hook(&self, sub: SubKey) -> Option<Rc<dyn Fn(&DebuggerEvent)>> {
        self.subs
            .get(sub)?
            .effect_slot()?
            .hooks
            .on_track
            .clone()
    }

    /// Number of Links in a Dep's subscriber list.
    pub(crate) fn attached_count(&self, dep: DepKey) -> usize {
        let mut count = 0;
        let mut cursor = self.deps.get(dep).and_then(|node| node.subs_head);
        while let Some(link) = cursor {
            count += 1;
            cursor = self.links[link].next_sub;
        }
        count
    }

    /// Drop a target's key table. Deps with live Links stay until unlinked.
    pub(crate) fn release_target(&mut self, target: TargetId) {
        let Some(keys) = self.registry.release(target) else {
            return;
        };
        for dep in keys.into_values() {
            if let Some(node) = self.deps.get_mut(dep) {
                node.owner = None;
                if node.sc == 0 {
                    self.deps.remove(dep);
                }
            }
        }
    }
}
