//! The per-parent weighted fair queue of active children.
//!
//! Children are ordered by virtual finish time (`clock + SCALE / weight`),
//! breaking ties by insertion order -- the weighted round-robin scheme
//! RFC 7540 §5.3 describes. The ordering lives in a `BTreeSet` of
//! `(finish_time, sequence, child_id)` triples rather than a `BinaryHeap`:
//! the contract needs arbitrary removal (a child going inactive), not just
//! popping the minimum, and a `BTreeSet` gives that in `O(log k)` alongside
//! the pop.

use std::collections::{BTreeSet, HashMap};

use crate::node::{VirtualTime, SCALE};
use crate::{StreamId, Weight};

type Key = (VirtualTime, u64, StreamId);

/// A weighted fair queue of one parent's currently-active children.
#[derive(Debug, Clone, Default)]
pub struct ChildScheduler {
    clock: VirtualTime,
    sequence: u64,
    order: BTreeSet<Key>,
    keys: HashMap<StreamId, Key>,
}

impl ChildScheduler {
    pub fn new() -> ChildScheduler {
        ChildScheduler {
            clock: 0,
            sequence: 0,
            order: BTreeSet::new(),
            keys: HashMap::new(),
        }
    }

    /// Registers `child_id` as active, keyed by the scheduler's current
    /// local clock. Returns the finish time it was keyed at.
    ///
    /// Re-adding a child that was previously popped re-keys it by the
    /// *current* clock rather than its stale finish time, so an active-again
    /// stream rejoins fairly instead of jumping the queue or starving.
    pub fn add(&mut self, child_id: StreamId, weight: Weight) -> VirtualTime {
        debug_assert!(weight >= 1 && weight <= 256, "weight out of range");
        let finish = self.clock + SCALE / VirtualTime::from(weight);
        let seq = self.sequence;
        self.sequence += 1;
        let key = (finish, seq, child_id);
        self.order.insert(key);
        self.keys.insert(child_id, key);
        finish
    }

    /// Removes `child_id` if present; a no-op otherwise.
    pub fn remove(&mut self, child_id: StreamId) {
        if let Some(key) = self.keys.remove(&child_id) {
            self.order.remove(&key);
        }
    }

    pub fn has(&self, child_id: StreamId) -> bool {
        self.keys.contains_key(&child_id)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pops the child with the least virtual finish time, advancing the
    /// local clock to that finish time so the next `add` re-keys relative to
    /// it.
    pub fn pop_next(&mut self) -> Option<StreamId> {
        let key = *self.order.iter().next()?;
        self.order.remove(&key);
        self.keys.remove(&key.2);
        self.clock = key.0;
        Some(key.2)
    }
}
