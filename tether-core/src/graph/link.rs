//! Links
//!
//! A Link is the edge between one Dep and one subscriber. It lives in two
//! doubly-linked lists at once:
//!
//! - the Dep's subscriber list (`prev_sub` / `next_sub`), walked on notify;
//! - the subscriber's dependency list (`prev_dep` / `next_dep`), rebuilt on
//!   every run.
//!
//! Links are recycled from run to run. Before a run every Link's version is
//! cleared; a read during the run re-confirms it, and whatever is still
//! unconfirmed afterwards is unlinked from both lists.

use smallvec::SmallVec;

use super::{DepKey, Graph, LinkKey, SubFlags, SubKey};

/// An edge between a Dep and a subscriber.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub(crate) dep: DepKey,
    pub(crate) sub: SubKey,
    /// Dep version observed at the last confirmed read. `None` while a run is
    /// in progress and the read has not happened yet.
    pub(crate) version: Option<u64>,
    pub(crate) prev_sub: Option<LinkKey>,
    pub(crate) next_sub: Option<LinkKey>,
    pub(crate) prev_dep: Option<LinkKey>,
    pub(crate) next_dep: Option<LinkKey>,
    /// The Dep's `active_link` before this subscriber started running.
    pub(crate) prev_active_link: Option<LinkKey>,
    /// Whether the Link is in the Dep's subscriber list.
    pub(crate) attached: bool,
}

impl Graph {
    /// Record that the active subscriber read `dep`.
    ///
    /// Returns the Link, or `None` when nothing is tracking.
    pub(crate) fn track_dep(&mut self, dep: DepKey) -> Option<LinkKey> {
        if !self.should_track {
            return None;
        }
        let sub = self.active_sub?;
        if !self.subs.contains_key(sub) {
            return None;
        }
        let node = self.deps.get(dep)?;
        if node.computed == Some(sub) {
            return None;
        }
        let version = node.version;

        let cached = node
            .active_link
            .filter(|&link| self.links.get(link).is_some_and(|link| link.sub == sub));

        match cached {
            Some(link) => {
                if self.links[link].version.is_none() {
                    // Reused from the previous run: confirm and keep the
                    // dependency list in read order.
                    self.links[link].version = Some(version);
                    self.move_to_deps_tail(link);
                }
                Some(link)
            }
            None => Some(self.create_link(dep, sub)),
        }
    }

    fn create_link(&mut self, dep: DepKey, sub: SubKey) -> LinkKey {
        let dep_node = &self.deps[dep];
        let tail = self.subs[sub].deps_tail;
        let link = self.links.insert(Link {
            dep,
            sub,
            version: Some(dep_node.version),
            prev_sub: None,
            next_sub: None,
            prev_dep: tail,
            next_dep: None,
            prev_active_link: dep_node.active_link,
            attached: false,
        });

        match tail {
            Some(tail) => self.links[tail].next_dep = Some(link),
            None => self.subs[sub].deps_head = Some(link),
        }
        self.subs[sub].deps_tail = Some(link);

        let dep_node = &mut self.deps[dep];
        dep_node.active_link = Some(link);
        dep_node.sc += 1;

        if self.subs[sub].flags.contains(SubFlags::TRACKING) {
            self.attach(link);
        }
        link
    }

    fn move_to_deps_tail(&mut self, link: LinkKey) {
        let Some(next) = self.links[link].next_dep else {
            return;
        };
        let sub = self.links[link].sub;
        let prev = self.links[link].prev_dep;

        self.links[next].prev_dep = prev;
        match prev {
            Some(prev) => self.links[prev].next_dep = Some(next),
            None => self.subs[sub].deps_head = Some(next),
        }

        let tail = self.subs[sub].deps_tail;
        if let Some(tail) = tail {
            self.links[tail].next_dep = Some(link);
        }
        let moved = &mut self.links[link];
        moved.prev_dep = tail;
        moved.next_dep = None;
        self.subs[sub].deps_tail = Some(link);
    }

    /// Append a Link to its Dep's subscriber list.
    ///
    /// When the Dep backs a computed that had no subscribers, the computed
    /// starts tracking and attaches its own upstream Links first.
    pub(crate) fn attach(&mut self, link: LinkKey) {
        if self.links[link].attached {
            return;
        }
        let dep = self.links[link].dep;
        let Some(node) = self.deps.get(dep) else {
            return;
        };

        if let (Some(computed), false) = (node.computed, node.has_subscribers()) {
            if let Some(computed_node) = self.subs.get_mut(computed) {
                computed_node.flags.insert(SubFlags::TRACKING | SubFlags::DIRTY);
                let mut cursor = computed_node.deps_head;
                while let Some(upstream) = cursor {
                    cursor = self.links[upstream].next_dep;
                    self.attach(upstream);
                }
            }
        }

        let tail = self.deps[dep].subs_tail;
        match tail {
            Some(tail) => self.links[tail].next_sub = Some(link),
            None => self.deps[dep].subs_head = Some(link),
        }
        let attached = &mut self.links[link];
        attached.prev_sub = tail;
        attached.next_sub = None;
        attached.attached = true;
        self.deps[dep].subs_tail = Some(link);
    }

    /// Remove a Link from its Dep's subscriber list.
    ///
    /// A computed losing its last subscriber stops tracking and detaches its
    /// own upstream Links.
    pub(crate) fn detach(&mut self, link: LinkKey) {
        let (dep, prev, next) = {
            let link = &mut self.links[link];
            if !link.attached {
                return;
            }
            link.attached = false;
            (link.dep, link.prev_sub.take(), link.next_sub.take())
        };

        if let Some(prev) = prev {
            self.links[prev].next_sub = next;
        }
        if let Some(next) = next {
            self.links[next].prev_sub = prev;
        }

        let Some(node) = self.deps.get_mut(dep) else {
            return;
        };
        if prev.is_none() {
            node.subs_head = next;
        }
        if next.is_none() {
            node.subs_tail = prev;
        }

        if let (Some(computed), false) = (node.computed, node.has_subscribers()) {
            if let Some(computed_node) = self.subs.get_mut(computed) {
                computed_node.flags.remove(SubFlags::TRACKING);
                let mut cursor = computed_node.deps_head;
                while let Some(upstream) = cursor {
                    cursor = self.links[upstream].next_dep;
                    self.detach(upstream);
                }
            }
        }
    }

    /// Remove a Link from its subscriber's dependency list.
    fn unlink_from_sub(&mut self, link: LinkKey) {
        let (sub, prev, next) = {
            let link = &mut self.links[link];
            (link.sub, link.prev_dep.take(), link.next_dep.take())
        };

        if let Some(prev) = prev {
            self.links[prev].next_dep = next;
        }
        if let Some(next) = next {
            self.links[next].prev_dep = prev;
        }
        if let Some(node) = self.subs.get_mut(sub) {
            if prev.is_none() {
                node.deps_head = next;
            }
            if next.is_none() {
                node.deps_tail = prev;
            }
        }
    }

    /// Unlink a Link from both lists and free it.
    pub(crate) fn destroy_link(&mut self, link: LinkKey) {
        self.detach(link);
        self.unlink_from_sub(link);

        let Some(removed) = self.links.remove(link) else {
            return;
        };
        let Some(node) = self.deps.get_mut(removed.dep) else {
            return;
        };
        if node.active_link == Some(link) {
            node.active_link = removed.prev_active_link;
        }
        node.sc = node.sc.saturating_sub(1);
        self.release_dep_if_unused(removed.dep);
    }

    /// Free a key Dep once nothing links to it.
    fn release_dep_if_unused(&mut self, dep: DepKey) {
        let Some(node) = self.deps.get(dep) else {
            return;
        };
        if node.sc > 0 || node.computed.is_some() {
            return;
        }
        if let Some((target, key)) = node.owner.clone() {
            self.registry.remove(target, &key, dep);
        }
        self.deps.remove(dep);
    }

    /// Mark every Link of `sub` unconfirmed and make it the active Link of
    /// its Dep for the duration of the run.
    pub(crate) fn prepare_deps(&mut self, sub: SubKey) {
        let Some(node) = self.subs.get(sub) else {
            return;
        };
        let mut cursor = node.deps_head;
        while let Some(link) = cursor {
            let (dep, next) = {
                let link = &mut self.links[link];
                link.version = None;
                (link.dep, link.next_dep)
            };
            cursor = next;
            if let Some(dep_node) = self.deps.get_mut(dep) {
                self.links[link].prev_active_link = dep_node.active_link.replace(link);
            }
        }
    }

    /// Restore active Links and prune the Links the run did not confirm.
    pub(crate) fn cleanup_deps(&mut self, sub: SubKey) {
        let Some(node) = self.subs.get(sub) else {
            return;
        };
        let mut cursor = node.deps_tail;
        while let Some(link) = cursor {
            let (dep, prev, restore, unread) = {
                let link = &mut self.links[link];
                (
                    link.dep,
                    link.prev_dep,
                    link.prev_active_link.take(),
                    link.version.is_none(),
                )
            };
            cursor = prev;
            if let Some(dep_node) = self.deps.get_mut(dep) {
                dep_node.active_link = restore;
            }
            if unread {
                self.destroy_link(link);
            }
        }
    }

    /// Destroy every Link of `sub`.
    pub(crate) fn teardown_deps(&mut self, sub: SubKey) {
        let Some(node) = self.subs.get(sub) else {
            return;
        };
        let mut cursor = node.deps_head;
        while let Some(link) = cursor {
            cursor = self.links[link].next_dep;
            self.destroy_link(link);
        }
    }

    /// Align a Link with its Dep after the Dep's value was refreshed.
    pub(crate) fn sync_link_version(&mut self, link: LinkKey) {
        let Some(dep) = self.links.get(link).map(|link| link.dep) else {
            return;
        };
        if let Some(version) = self.deps.get(dep).map(|dep| dep.version) {
            self.links[link].version = Some(version);
        }
    }

    /// `(dep, observed version)` for each dependency of `sub`, in read order.
    pub(crate) fn dep_snapshot(&self, sub: SubKey) -> SmallVec<[(DepKey, Option<u64>); 8]> {
        let mut snapshot = SmallVec::new();
        let Some(node) = self.subs.get(sub) else {
            return snapshot;
        };
        let mut cursor = node.deps_head;
        while let Some(link) = cursor {
            let link = &self.links[link];
            snapshot.push((link.dep, link.version));
            cursor = link.next_dep;
        }
        snapshot
    }

    pub(crate) fn dependency_count(&self, sub: SubKey) -> usize {
        self.dep_snapshot(sub).len()
    }
}
