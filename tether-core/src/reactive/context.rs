//! Reactive Context
//!
//! The reactive context tracks which subscriber is currently running. This
//! enables automatic dependency tracking: when a Dep is read, the runtime
//! links it to the current subscriber.
//!
//! # Implementation
//!
//! The active subscriber is a single slot in the runtime's graph. Entering a
//! run saves the previous occupant and the `should_track` flag; the guard
//! restores both when dropped, so nested runs (an effect reading a computed
//! that evaluates) attribute reads to the innermost subscriber and the outer
//! one resumes where it left off. Guards restore state even when the user
//! closure panics.
//!
//! Batches work the same way: [`BatchScope`] holds one batch level opened by
//! the runtime, and [`DrainScope`] holds the outermost level while queued
//! effects run. A panic escaping either leaves the batch closed, so later
//! writes still drain.

use tracing::{trace, warn};

use super::runtime::Runtime;
use super::subscriber::SubscriberKind;
use crate::error::ReactiveError;
use crate::graph::{SubFlags, SubKey};

/// Guard for one tracked run of a subscriber.
///
/// On drop: restores the previous active subscriber, prunes the Links the
/// run did not confirm, and clears RUNNING.
pub(crate) struct ActiveScope<'rt> {
    runtime: &'rt Runtime,
    sub: SubKey,
    prev_sub: Option<SubKey>,
    prev_should_track: bool,
}

impl<'rt> ActiveScope<'rt> {
    /// Make `sub` the active subscriber.
    ///
    /// The caller has already flagged it RUNNING and prepared its Links.
    pub(crate) fn enter(runtime: &'rt Runtime, sub: SubKey) -> Self {
        let mut graph = runtime.graph();
        let prev_sub = graph.active_sub.replace(sub);
        let prev_should_track = std::mem::replace(&mut graph.should_track, true);
        trace!(sub = ?sub, prev = ?prev_sub, "entered reactive scope");

        Self {
            runtime,
            sub,
            prev_sub,
            prev_should_track,
        }
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        let reclaimed = {
            let mut graph = self.runtime.graph();

            // Verify we're popping the right scope.
            debug_assert_eq!(
                graph.active_sub,
                Some(self.sub),
                "ActiveScope mismatch: expected {:?}, got {:?}",
                self.sub,
                graph.active_sub
            );

            graph.active_sub = self.prev_sub;
            graph.should_track = self.prev_should_track;
            graph.cleanup_deps(self.sub);
            let stopped = match graph.subs.get_mut(self.sub) {
                Some(node) => {
                    node.flags.remove(SubFlags::RUNNING);
                    node.kind() == SubscriberKind::Effect
                        && !node.flags.contains(SubFlags::ACTIVE)
                }
                None => false,
            };
            if stopped {
                // Reads made after a stop inside the run are not kept.
                graph.teardown_deps(self.sub);
            }
            graph.reclaim_if_stopped(self.sub)
        };
        // An effect stopped during its own run is freed here, outside the
        // graph borrow.
        drop(reclaimed);
    }
}

/// Guard for one batch level opened by the runtime.
///
/// [`BatchScope::close`] ends the level normally. Dropped without closing,
/// which only happens on unwind, it gives the level back without draining.
pub(crate) struct BatchScope<'rt> {
    runtime: &'rt Runtime,
    open: bool,
}

impl<'rt> BatchScope<'rt> {
    pub(crate) fn enter(runtime: &'rt Runtime) -> Self {
        runtime.start_batch();
        Self {
            runtime,
            open: true,
        }
    }

    /// End the level, draining queued effects if it was the outermost one.
    pub(crate) fn close(mut self) -> Result<(), ReactiveError> {
        self.open = false;
        self.runtime.end_batch()
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let Some(mut graph) = self.runtime.try_graph() else {
            return;
        };
        if graph.batch.depth > 1 {
            graph.batch.depth -= 1;
            return;
        }
        let dropped = graph.finish_batch();
        if dropped > 0 {
            warn!(effects = dropped, "batch unwound; queued effects dropped");
        }
    }
}

/// Guard for the drain of the outermost batch.
///
/// On drop the batch is closed: the depth returns to zero, computeds marked
/// during the batch are released, and effects a panic left queued are dropped.
pub(crate) struct DrainScope<'rt> {
    runtime: &'rt Runtime,
}

impl<'rt> DrainScope<'rt> {
    pub(crate) fn enter(runtime: &'rt Runtime) -> Self {
        runtime.graph().batch.depth = 1;
        Self { runtime }
    }
}

impl Drop for DrainScope<'_> {
    fn drop(&mut self) {
        let Some(mut graph) = self.runtime.try_graph() else {
            return;
        };
        let dropped = graph.finish_batch();
        if dropped > 0 {
            warn!(effects = dropped, "batch drain unwound; queued effects dropped");
        }
    }
}

/// Guard that runs code with no active subscriber, e.g. effect cleanups.
pub(crate) struct SuspendScope<'rt> {
    runtime: &'rt Runtime,
    prev_sub: Option<SubKey>,
}

impl<'rt> SuspendScope<'rt> {
    pub(crate) fn enter(runtime: &'rt Runtime) -> Self {
        let prev_sub = runtime.graph().active_sub.take();
        Self { runtime, prev_sub }
    }
}

impl Drop for SuspendScope<'_> {
    fn drop(&mut self) {
        self.runtime.graph().active_sub = self.prev_sub;
    }
}

/// Guard that pops one `pause_tracking` / `enable_tracking` level.
pub(crate) struct TrackingGuard<'rt> {
    runtime: &'rt Runtime,
}

impl<'rt> TrackingGuard<'rt> {
    pub(crate) fn paused(runtime: &'rt Runtime) -> Self {
        runtime.pause_tracking();
        Self { runtime }
    }
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        self.runtime.reset_tracking();
    }
}
