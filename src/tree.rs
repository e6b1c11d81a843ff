//! The priority tree: node ownership, global invariants, and the mutation
//! operations (insert, reprioritize, remove, block, unblock).

use std::collections::HashMap;

use crate::error::{Error, ErrorKind};
use crate::node::Node;
use crate::scheduler::ChildScheduler;
use crate::{Result, StreamId, Weight};

/// The safety ceiling on user-stream count used when a caller does not pick
/// their own. Guards against the unbounded-tree-growth DoS fixed upstream as
/// CVE-2016-6580.
pub const DEFAULT_MAXIMUM_STREAMS: usize = 1000;

/// A dynamic forest of HTTP/2 streams, rooted at the implicit pseudo-stream
/// `0`, that answers "which stream should transmit next?" in proportion to
/// each stream's weight among its active siblings.
///
/// All operations are synchronous, single-threaded, and strongly
/// exception-safe: a failed operation leaves the tree exactly as it was
/// before the call.
#[derive(Debug)]
pub struct PriorityTree {
    maximum_streams: usize,
    stream_count: usize,
    pub(crate) nodes: HashMap<StreamId, Node>,
    pub(crate) schedulers: HashMap<StreamId, ChildScheduler>,
}

impl PriorityTree {
    /// Creates an empty tree with the given cap on user-stream count.
    ///
    /// Fails [`ErrorKind::BadTreeConfig`] if `maximum_streams` is `0`.
    pub fn new(maximum_streams: usize) -> Result<PriorityTree> {
        if maximum_streams == 0 {
            return Err(Error::kind_only(ErrorKind::BadTreeConfig));
        }
        let mut nodes = HashMap::new();
        let mut schedulers = HashMap::new();
        nodes.insert(0, Node::root());
        schedulers.insert(0, ChildScheduler::new());
        Ok(PriorityTree {
            maximum_streams,
            stream_count: 0,
            nodes,
            schedulers,
        })
    }

    /// The number of live user streams (excludes the pseudo-stream).
    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    /// The configured cap on user-stream count.
    pub fn maximum_streams(&self) -> usize {
        self.maximum_streams
    }

    /// Whether `stream_id` currently exists in the tree. Always `false` for
    /// `0`, the pseudo-stream, which is never user-visible.
    pub fn contains(&self, stream_id: StreamId) -> bool {
        stream_id != 0 && self.nodes.contains_key(&stream_id)
    }

    /// The weight currently assigned to `stream_id`.
    pub fn weight_of(&self, stream_id: StreamId) -> Result<Weight> {
        self.require(stream_id).map(|node| node.weight)
    }

    /// Whether `stream_id` is currently marked blocked.
    pub fn is_blocked(&self, stream_id: StreamId) -> Result<bool> {
        self.require(stream_id).map(|node| node.blocked)
    }

    /// `stream_id`'s parent, or `None` if it depends directly on the root.
    pub fn parent_of(&self, stream_id: StreamId) -> Result<Option<StreamId>> {
        self.require(stream_id).map(|node| match node.parent {
            0 => None,
            parent => Some(parent),
        })
    }

    fn require(&self, stream_id: StreamId) -> Result<&Node> {
        // Id 0 is never user-visible (invariant 2): treat a query for it the
        // same as querying any other id that was never inserted.
        if stream_id == 0 {
            return Err(Error::for_stream(ErrorKind::MissingStream, stream_id));
        }
        self.nodes
            .get(&stream_id)
            .ok_or_else(|| Error::for_stream(ErrorKind::MissingStream, stream_id))
    }

    fn require_mutable(&self, stream_id: StreamId) -> Result<()> {
        if stream_id == 0 {
            return Err(Error::for_stream(ErrorKind::PseudoStreamError, stream_id));
        }
        if !self.nodes.contains_key(&stream_id) {
            return Err(Error::for_stream(ErrorKind::MissingStream, stream_id));
        }
        Ok(())
    }

    fn validate_weight(weight: Weight, stream_id: StreamId) -> Result<()> {
        if weight == 0 || weight > 256 {
            Err(Error::for_stream(ErrorKind::BadWeight, stream_id))
        } else {
            Ok(())
        }
    }

    /// `true` if `node_id` is `ancestor_id` itself, or if walking up
    /// `node_id`'s parent chain reaches `ancestor_id` before the root.
    fn is_descendant_of(&self, node_id: StreamId, ancestor_id: StreamId) -> bool {
        let mut current = node_id;
        loop {
            if current == ancestor_id {
                return true;
            }
            if current == 0 {
                return false;
            }
            current = self.nodes[&current].parent;
        }
    }

    /// Inserts a new stream. `depends_on` of `None` or an id that no longer
    /// exists (idle/closed) is treated as the root -- inserting never fails
    /// on an unknown parent.
    pub fn insert_stream(
        &mut self,
        stream_id: StreamId,
        depends_on: Option<StreamId>,
        weight: Weight,
        exclusive: bool,
    ) -> Result<()> {
        if stream_id == 0 {
            return Err(Error::for_stream(ErrorKind::PseudoStreamError, stream_id));
        }
        Self::validate_weight(weight, stream_id)?;
        if self.nodes.contains_key(&stream_id) {
            return Err(Error::for_stream(ErrorKind::DuplicateStream, stream_id));
        }
        let requested_parent = depends_on.unwrap_or(0);
        if requested_parent == stream_id {
            return Err(Error::for_stream(ErrorKind::PriorityLoop, stream_id));
        }
        if self.stream_count >= self.maximum_streams {
            return Err(Error::for_stream(ErrorKind::TooManyStreams, stream_id));
        }
        let parent_id = if requested_parent == 0 || self.nodes.contains_key(&requested_parent) {
            requested_parent
        } else {
            // Permissive lookup: an unknown depends_on is idle/closed, treat
            // it as the root rather than failing.
            0
        };

        self.nodes
            .insert(stream_id, Node::new(stream_id, weight, parent_id));
        self.schedulers.insert(stream_id, ChildScheduler::new());
        self.stream_count += 1;

        if exclusive {
            let displaced = self.nodes[&parent_id].children.clone();
            for child_id in displaced {
                self.move_child(child_id, parent_id, stream_id);
            }
        }
        self.nodes.get_mut(&parent_id).unwrap().children.push(stream_id);

        // The new node may have inherited active children via `exclusive`.
        self.propagate_from(stream_id);
        // The parent may have lost activeness if its children were displaced.
        self.propagate_from(parent_id);

        trace!(
            "insert_stream: {} under {} (weight {}, exclusive {})",
            stream_id,
            parent_id,
            weight,
            exclusive
        );
        Ok(())
    }

    /// Moves `stream_id` to a new parent and/or weight, applying `exclusive`
    /// reparenting and the RFC 7540 §5.3.3 splice if the new parent is
    /// currently a descendant of `stream_id`.
    pub fn reprioritize(
        &mut self,
        stream_id: StreamId,
        depends_on: Option<StreamId>,
        weight: Weight,
        exclusive: bool,
    ) -> Result<()> {
        if stream_id == 0 {
            return Err(Error::for_stream(ErrorKind::PseudoStreamError, stream_id));
        }
        Self::validate_weight(weight, stream_id)?;
        if !self.nodes.contains_key(&stream_id) {
            return Err(Error::for_stream(ErrorKind::MissingStream, stream_id));
        }
        let new_parent = depends_on.unwrap_or(0);
        if new_parent == stream_id {
            return Err(Error::for_stream(ErrorKind::PriorityLoop, stream_id));
        }
        // Unlike insertion, reprioritize does not extend the permissive
        // root-fallback to an unknown parent: the stream named by
        // `depends_on` must actually exist.
        if new_parent != 0 && !self.nodes.contains_key(&new_parent) {
            return Err(Error::for_stream(ErrorKind::MissingStream, new_parent));
        }

        if new_parent != 0 && self.is_descendant_of(new_parent, stream_id) {
            self.splice_out(stream_id);
        }

        let old_parent = self.nodes[&stream_id].parent;
        self.detach_structural(stream_id, old_parent);

        if exclusive {
            let siblings = self.nodes[&new_parent].children.clone();
            for sibling_id in siblings {
                self.move_child(sibling_id, new_parent, stream_id);
            }
        }

        self.nodes.get_mut(&stream_id).unwrap().parent = new_parent;
        self.nodes.get_mut(&stream_id).unwrap().weight = weight;
        self.nodes.get_mut(&new_parent).unwrap().children.push(stream_id);

        // stream_id's own scheduler membership under its (new) parent, plus
        // any activeness change inherited from exclusively-absorbed siblings.
        self.propagate_from(stream_id);
        // old_parent may have lost activeness; new_parent may have lost
        // whatever `exclusive` displaced from it.
        self.propagate_from(old_parent);
        self.propagate_from(new_parent);

        trace!(
            "reprioritize: {} now under {} (weight {}, exclusive {})",
            stream_id,
            new_parent,
            weight,
            exclusive
        );
        Ok(())
    }

    /// Removes `stream_id`. Its children are reparented to its former
    /// parent, in their original relative order, taking the removed node's
    /// position among its siblings.
    pub fn remove_stream(&mut self, stream_id: StreamId) -> Result<()> {
        self.require_mutable(stream_id)?;

        let parent_id = self.nodes[&stream_id].parent;
        let children = self.nodes[&stream_id].children.clone();

        if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
            if let Some(pos) = parent_node.children.iter().position(|&c| c == stream_id) {
                parent_node.children.splice(pos..pos + 1, children.iter().copied());
            }
        }
        self.schedulers.get_mut(&parent_id).unwrap().remove(stream_id);

        for child_id in &children {
            self.nodes.get_mut(child_id).unwrap().parent = parent_id;
            self.sync_membership(*child_id);
        }

        self.nodes.remove(&stream_id);
        self.schedulers.remove(&stream_id);
        self.stream_count -= 1;

        self.propagate_from(parent_id);

        debug!(
            "remove_stream: {} reparented {} children to {}",
            stream_id,
            children.len(),
            parent_id
        );
        Ok(())
    }

    /// Marks `stream_id` unable to transmit right now. Idempotent.
    pub fn block(&mut self, stream_id: StreamId) -> Result<()> {
        self.require_mutable(stream_id)?;
        self.nodes.get_mut(&stream_id).unwrap().blocked = true;
        self.propagate_from(stream_id);
        debug!("block: {}", stream_id);
        Ok(())
    }

    /// Marks `stream_id` able to transmit. Idempotent.
    pub fn unblock(&mut self, stream_id: StreamId) -> Result<()> {
        self.require_mutable(stream_id)?;
        self.nodes.get_mut(&stream_id).unwrap().blocked = false;
        self.propagate_from(stream_id);
        debug!("unblock: {}", stream_id);
        Ok(())
    }

    /// Detaches `child_id` from `old_parent`'s children list and scheduler
    /// (structural bookkeeping only; does not touch `child_id`'s own
    /// parent pointer).
    fn detach_structural(&mut self, child_id: StreamId, old_parent: StreamId) {
        if let Some(parent_node) = self.nodes.get_mut(&old_parent) {
            parent_node.children.retain(|&c| c != child_id);
        }
        self.schedulers.get_mut(&old_parent).unwrap().remove(child_id);
    }

    /// Relocates `child_id` from `old_parent` to `new_parent`, preserving its
    /// weight and active flag, and re-keying its scheduler membership (if
    /// active) relative to `new_parent`'s current clock.
    fn move_child(&mut self, child_id: StreamId, old_parent: StreamId, new_parent: StreamId) {
        self.detach_structural(child_id, old_parent);
        self.nodes.get_mut(&child_id).unwrap().parent = new_parent;
        self.nodes.get_mut(&new_parent).unwrap().children.push(child_id);
        self.sync_membership(child_id);
    }

    /// Implements the RFC 7540 §5.3.3 move procedure's splice step: when
    /// reprioritizing `stream_id` would make it depend on one of its own
    /// descendants, first lift `stream_id` out of the tree by replacing its
    /// slot in its current parent's children with its own children, in
    /// order, reparenting each of them there.
    fn splice_out(&mut self, stream_id: StreamId) {
        let old_parent = self.nodes[&stream_id].parent;
        let children = self.nodes[&stream_id].children.clone();

        if let Some(parent_node) = self.nodes.get_mut(&old_parent) {
            if let Some(pos) = parent_node.children.iter().position(|&c| c == stream_id) {
                parent_node.children.splice(pos..pos + 1, children.iter().copied());
            }
        }
        self.nodes.get_mut(&stream_id).unwrap().children.clear();

        for child_id in children {
            self.nodes.get_mut(&child_id).unwrap().parent = old_parent;
            let active = self.nodes[&child_id].active;
            if active {
                self.schedulers.get_mut(&stream_id).unwrap().remove(child_id);
                let weight = self.nodes[&child_id].weight;
                let finish = self.schedulers.get_mut(&old_parent).unwrap().add(child_id, weight);
                self.nodes.get_mut(&child_id).unwrap().last_virtual_finish = finish;
            }
        }
        trace!("splice_out: {} (formerly under {})", stream_id, old_parent);
    }

    /// Ensures `node_id`'s membership in its *current* parent's scheduler
    /// matches its current `active` flag. Idempotent; safe to call whenever
    /// a node's parent or active flag may have changed.
    fn sync_membership(&mut self, node_id: StreamId) {
        if node_id == 0 {
            return;
        }
        let parent_id = self.nodes[&node_id].parent;
        let active = self.nodes[&node_id].active;
        let present = self.schedulers[&parent_id].has(node_id);
        if active && !present {
            let weight = self.nodes[&node_id].weight;
            let finish = self.schedulers.get_mut(&parent_id).unwrap().add(node_id, weight);
            self.nodes.get_mut(&node_id).unwrap().last_virtual_finish = finish;
        } else if !active && present {
            self.schedulers.get_mut(&parent_id).unwrap().remove(node_id);
        }
    }

    /// Recomputes `active(n) = !blocked(n) || any child active` starting at
    /// `start`, walking upward only as long as the value actually changes --
    /// this is what keeps mutation `O(depth)` rather than `O(nodes)`.
    fn propagate_from(&mut self, start: StreamId) {
        let mut current = start;
        loop {
            let blocked = self.nodes[&current].blocked;
            let has_active_child = !self.schedulers[&current].is_empty();
            let new_active = !blocked || has_active_child;
            let old_active = self.nodes[&current].active;

            if new_active == old_active {
                break;
            }
            self.nodes.get_mut(&current).unwrap().active = new_active;

            if current == 0 {
                break; // the root has no parent to notify
            }
            self.sync_membership(current);
            current = self.nodes[&current].parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> PriorityTree {
        PriorityTree::new(1000).unwrap()
    }

    #[test]
    fn new_rejects_zero_cap() {
        let err = PriorityTree::new(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadTreeConfig);
    }

    #[test]
    fn insert_defaults_to_blocked_and_inactive() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        assert!(t.is_blocked(1).unwrap());
        assert!(!t.schedulers[&0].has(1));
    }

    #[test]
    fn insert_duplicate_is_rejected() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        let err = t.insert_stream(1, None, 16, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateStream);
        assert_eq!(err.stream_id(), Some(1));
    }

    #[test]
    fn insert_bad_weight_is_rejected() {
        let mut t = tree();
        assert_eq!(
            t.insert_stream(1, None, 0, false).unwrap_err().kind(),
            ErrorKind::BadWeight
        );
        assert_eq!(
            t.insert_stream(1, None, 257, false).unwrap_err().kind(),
            ErrorKind::BadWeight
        );
    }

    #[test]
    fn insert_self_dependency_is_a_loop() {
        let mut t = tree();
        let err = t.insert_stream(1, Some(1), 16, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PriorityLoop);
    }

    #[test]
    fn insert_unknown_parent_falls_back_to_root() {
        let mut t = tree();
        t.insert_stream(1, Some(99), 16, false).unwrap();
        assert_eq!(t.parent_of(1).unwrap(), None);
    }

    #[test]
    fn insert_respects_cap() {
        let mut t = PriorityTree::new(1).unwrap();
        t.insert_stream(1, None, 16, false).unwrap();
        let err = t.insert_stream(3, None, 16, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManyStreams);
    }

    #[test]
    fn insert_at_exact_cap_succeeds() {
        let mut t = PriorityTree::new(2).unwrap();
        t.insert_stream(1, None, 16, false).unwrap();
        t.insert_stream(3, None, 16, false).unwrap();
        assert_eq!(t.stream_count(), 2);
    }

    #[test]
    fn unblock_adds_to_parent_scheduler() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.unblock(1).unwrap();
        assert!(t.schedulers[&0].has(1));
        assert!(!t.is_blocked(1).unwrap());
    }

    #[test]
    fn block_unblock_are_idempotent() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.unblock(1).unwrap();
        t.unblock(1).unwrap();
        assert!(t.schedulers[&0].has(1));
        t.block(1).unwrap();
        t.block(1).unwrap();
        assert!(!t.schedulers[&0].has(1));
    }

    #[test]
    fn block_then_unblock_restores_active_membership() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.unblock(1).unwrap();
        assert!(t.schedulers[&0].has(1));
        t.block(1).unwrap();
        assert!(!t.schedulers[&0].has(1));
        t.unblock(1).unwrap();
        assert!(t.schedulers[&0].has(1));
    }

    #[test]
    fn blocked_parent_with_active_child_is_itself_active() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.insert_stream(3, Some(1), 16, false).unwrap();
        t.unblock(3).unwrap();
        // 1 stays blocked, but becomes active because 3 is active beneath it.
        assert!(t.schedulers[&0].has(1));
        assert!(t.schedulers[&1].has(3));
    }

    #[test]
    fn removing_the_only_active_child_deactivates_a_blocked_parent() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.insert_stream(3, Some(1), 16, false).unwrap();
        t.unblock(3).unwrap();
        assert!(t.schedulers[&0].has(1));
        t.remove_stream(3).unwrap();
        assert!(!t.schedulers[&0].has(1));
    }

    #[test]
    fn remove_reparents_children_preserving_order() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.insert_stream(3, Some(1), 16, false).unwrap();
        t.insert_stream(5, Some(1), 16, false).unwrap();
        t.insert_stream(7, Some(1), 16, false).unwrap();
        t.remove_stream(1).unwrap();
        assert_eq!(t.parent_of(3).unwrap(), None);
        assert_eq!(t.parent_of(5).unwrap(), None);
        assert_eq!(t.parent_of(7).unwrap(), None);
        assert_eq!(t.nodes[&0].children, vec![3, 5, 7]);
    }

    #[test]
    fn remove_is_not_idempotent() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.remove_stream(1).unwrap();
        let err = t.remove_stream(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingStream);
    }

    #[test]
    fn pseudo_stream_is_immutable() {
        let mut t = tree();
        assert_eq!(t.remove_stream(0).unwrap_err().kind(), ErrorKind::PseudoStreamError);
        assert_eq!(t.block(0).unwrap_err().kind(), ErrorKind::PseudoStreamError);
        assert_eq!(t.unblock(0).unwrap_err().kind(), ErrorKind::PseudoStreamError);
        assert_eq!(
            t.reprioritize(0, None, 16, false).unwrap_err().kind(),
            ErrorKind::PseudoStreamError
        );
    }

    #[test]
    fn exclusive_insert_adopts_existing_siblings() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.insert_stream(3, None, 16, false).unwrap();
        t.insert_stream(5, None, 16, true).unwrap();
        assert_eq!(t.parent_of(1).unwrap(), Some(5));
        assert_eq!(t.parent_of(3).unwrap(), Some(5));
        assert_eq!(t.parent_of(5).unwrap(), None);
    }

    #[test]
    fn reprioritize_updates_weight_and_parent() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.insert_stream(3, None, 16, false).unwrap();
        t.reprioritize(3, Some(1), 32, false).unwrap();
        assert_eq!(t.parent_of(3).unwrap(), Some(1));
        assert_eq!(t.weight_of(3).unwrap(), 32);
    }

    #[test]
    fn reprioritize_missing_depends_on_is_an_error() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        let err = t.reprioritize(1, Some(99), 16, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingStream);
        assert_eq!(err.stream_id(), Some(99));
    }

    #[test]
    fn reprioritize_onto_self_is_a_loop() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        let err = t.reprioritize(1, Some(1), 16, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PriorityLoop);
    }

    /// Scenario 6: tree 1->0, 3->1, 5->3; reprioritize 1 under 5 splices
    /// 3 up to the root and moves 1 beneath 5.
    #[test]
    fn reprioritize_splices_on_would_be_cycle() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.insert_stream(3, Some(1), 16, false).unwrap();
        t.insert_stream(5, Some(3), 16, false).unwrap();

        t.reprioritize(1, Some(5), 16, false).unwrap();

        assert_eq!(t.parent_of(3).unwrap(), None);
        assert_eq!(t.parent_of(5).unwrap(), Some(3));
        assert_eq!(t.parent_of(1).unwrap(), Some(5));
    }

    #[test]
    fn reprioritize_exclusive_adopts_new_siblings() {
        let mut t = tree();
        t.insert_stream(1, None, 16, false).unwrap();
        t.insert_stream(3, None, 16, false).unwrap();
        t.insert_stream(5, None, 16, false).unwrap();

        t.reprioritize(5, None, 16, true).unwrap();

        assert_eq!(t.parent_of(1).unwrap(), Some(5));
        assert_eq!(t.parent_of(3).unwrap(), Some(5));
    }

    #[test]
    fn contains_and_introspection_reject_the_pseudo_stream() {
        let t = tree();
        assert!(!t.contains(0));
        assert_eq!(t.weight_of(0).unwrap_err().kind(), ErrorKind::MissingStream);
    }
}
