//! Pulling the next stream to transmit out of the tree.
//!
//! Selection walks down from the root, at each level popping the
//! least-virtual-finish-time child from that level's scheduler. If that
//! child is itself unblocked, it is served directly -- an unblocked stream
//! always takes its own turn, even if it also has active children, which
//! simply wait their turn for when it next blocks. Only a blocked-but-active
//! child is descended into, on the theory that its own children are who's
//! actually ready to transmit on its behalf.

use crate::error::{Error, ErrorKind};
use crate::tree::PriorityTree;
use crate::{Result, StreamId};

impl PriorityTree {
    /// Selects the next stream id to transmit, honoring weight at every
    /// level of the tree on the way down.
    ///
    /// Fails [`ErrorKind::Deadlock`] if no user stream is currently active.
    pub fn next(&mut self) -> Result<StreamId> {
        if self.schedulers[&0].is_empty() {
            return Err(Error::kind_only(ErrorKind::Deadlock));
        }

        let mut parent = 0;
        let mut path = Vec::new();
        let served = loop {
            let child = self
                .schedulers
                .get_mut(&parent)
                .unwrap()
                .pop_next()
                .expect("checked non-empty by the loop invariant");
            path.push(child);

            if !self.nodes[&child].blocked {
                // unblocked: it takes its own turn, regardless of whatever
                // is waiting beneath it.
                break child;
            }
            parent = child;
        };

        // Every node popped along the descent path -- the served leaf and
        // every blocked-but-active ancestor on the way to it -- rejoins its
        // own parent's scheduler, re-keyed off that parent's now-advanced
        // local clock. This is what produces weighted round-robin at every
        // level, not just the leaf's.
        for node_id in path {
            self.requeue_after_serving(node_id);
        }
        Ok(served)
    }

    /// Selects the next `n` streams to transmit, in order. Pure sugar over
    /// repeated `next()` calls: it introduces no new semantics, including
    /// `Deadlock` propagating exactly as a bare `next()` call would.
    pub fn take(&mut self, n: usize) -> Result<Vec<StreamId>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.next()?);
        }
        Ok(out)
    }

    /// `child` (the served leaf, or a blocked-but-active node passed
    /// through on the way to it) remains active, but its weighted turn has
    /// been used: it is re-added to its parent's scheduler at a finish time
    /// computed off the parent's now-advanced clock, exactly as
    /// `sync_membership` would if it had transitioned from inactive to
    /// active just now.
    fn requeue_after_serving(&mut self, child: StreamId) {
        let parent = self.nodes[&child].parent;
        let weight = self.nodes[&child].weight;
        let finish = self.schedulers.get_mut(&parent).unwrap().add(child, weight);
        self.nodes.get_mut(&child).unwrap().last_virtual_finish = finish;
    }
}
