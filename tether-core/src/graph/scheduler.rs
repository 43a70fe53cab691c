//! Batch Queues
//!
//! Notifications are not acted on immediately. A notified subscriber is
//! flagged NOTIFIED and pushed onto an intrusive singly-linked queue threaded
//! through its `next` field; the flag makes repeated notifications within one
//! batch idempotent.
//!
//! # Queues
//!
//! - `effects`: effects waiting to run. Notification walks subscribers newest
//!   to oldest and pushes at the head, so popping from the head yields
//!   subscription order.
//! - `draining`: the generation of effects currently being run. Effects
//!   notified while a generation runs land in `effects` and form the next
//!   generation.
//! - `computeds`: computeds marked dirty during the batch. They are never
//!   run by the drain; the queue only exists so their NOTIFIED flag can be
//!   cleared when the batch closes.
//!
//! The `paused` set holds effects that were triggered while paused and must
//! be triggered on resume.

use indexmap::IndexSet;

use super::{Graph, SubFlags, SubKey};

#[derive(Debug, Default)]
pub(crate) struct BatchQueue {
    /// Open `start_batch` calls, plus one while a drain is in progress.
    pub(crate) depth: usize,
    pub(crate) effects: Option<SubKey>,
    pub(crate) draining: Option<SubKey>,
    pub(crate) computeds: Option<SubKey>,
    pub(crate) paused: IndexSet<SubKey>,
}

impl Graph {
    /// Flag a subscriber NOTIFIED and push it onto its queue.
    pub(crate) fn enqueue(&mut self, sub: SubKey, computed: bool) {
        let Some(node) = self.subs.get_mut(sub) else {
            return;
        };
        node.flags.insert(SubFlags::NOTIFIED);
        let head = if computed {
            &mut self.batch.computeds
        } else {
            &mut self.batch.effects
        };
        node.next = head.replace(sub);
    }

    /// Pop the next effect to run, starting a new generation when the
    /// current one is exhausted.
    ///
    /// Computeds marked by the previous generation are released when a new
    /// one starts, so writes made by those effects can notify through them
    /// again.
    pub(crate) fn pop_effect(&mut self) -> Option<SubKey> {
        if self.batch.draining.is_none() {
            self.release_computeds();
            self.batch.draining = self.batch.effects.take();
        }
        let sub = self.batch.draining?;
        let node = &mut self.subs[sub];
        self.batch.draining = node.next.take();
        node.flags.remove(SubFlags::NOTIFIED);
        Some(sub)
    }

    /// Clear the NOTIFIED flag of every computed marked in this batch.
    pub(crate) fn release_computeds(&mut self) {
        let mut cursor = self.batch.computeds.take();
        while let Some(sub) = cursor {
            let node = &mut self.subs[sub];
            cursor = node.next.take();
            node.flags.remove(SubFlags::NOTIFIED);
        }
    }

    /// Close the outermost batch: release marked computeds and drop any
    /// effect still queued. Returns how many effects were dropped, which is
    /// zero unless a drain was cut short.
    pub(crate) fn finish_batch(&mut self) -> usize {
        let mut dropped = 0;
        for head in [self.batch.draining.take(), self.batch.effects.take()] {
            let mut cursor = head;
            while let Some(sub) = cursor {
                let Some(node) = self.subs.get_mut(sub) else {
                    break;
                };
                cursor = node.next.take();
                node.flags.remove(SubFlags::NOTIFIED);
                dropped += 1;
            }
        }
        self.release_computeds();
        self.batch.depth = 0;
        dropped
    }

    /// Unlink a subscriber from whichever queue holds it.
    pub(crate) fn dequeue(&mut self, sub: SubKey) {
        let Some(node) = self.subs.get(sub) else {
            return;
        };
        if !node.flags.contains(SubFlags::NOTIFIED) {
            return;
        }

        let next = node.next;
        for head in [
            &mut self.batch.effects,
            &mut self.batch.draining,
            &mut self.batch.computeds,
        ] {
            if *head == Some(sub) {
                *head = next;
                break;
            }
            let mut cursor = *head;
            while let Some(current) = cursor {
                let current_next = self.subs[current].next;
                if current_next == Some(sub) {
                    self.subs[current].next = next;
                    break;
                }
                cursor = current_next;
            }
        }

        let node = &mut self.subs[sub];
        node.next = None;
        node.flags.remove(SubFlags::NOTIFIED);
    }
}
