//! A single node in the priority forest.

use crate::{StreamId, Weight};

/// Virtual-finish-time key used by the child scheduler.
///
/// Stored as a `256`-scaled fixed-point integer rather than a float, so that
/// `SCALE / weight` is always an exact step for `weight` in `[1, 256]` and
/// repeated re-keying across a long-running iteration cannot drift.
pub type VirtualTime = u64;

/// The fixed-point scale applied to every virtual-finish computation. Chosen
/// to match the numerator of the `clock + 256 / weight` formula from
/// RFC 7540 so that `SCALE / weight` is always exact.
pub const SCALE: VirtualTime = 256;

/// A single stream's identity, weight, tree position and scheduler state.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: StreamId,
    pub weight: Weight,
    /// `0` when the parent is the implicit root.
    pub parent: StreamId,
    pub blocked: bool,
    /// `!blocked || any child active`, maintained incrementally.
    pub active: bool,
    pub last_virtual_finish: VirtualTime,
    /// All children, active or not, in the order they were attached.
    /// Needed (separately from the active-only child scheduler) so that
    /// removal and exclusive reparenting can preserve original order.
    pub children: Vec<StreamId>,
}

impl Node {
    /// The synthetic root, id `0`. Never user-visible, never mutated through
    /// the public API.
    pub fn root() -> Node {
        Node {
            id: 0,
            weight: crate::DEFAULT_WEIGHT,
            parent: 0,
            blocked: false,
            active: false,
            last_virtual_finish: 0,
            children: Vec::new(),
        }
    }

    /// A freshly inserted stream: blocked by default (RFC 7540 gives no
    /// guidance here; the historical implementation this crate is modeled on
    /// assumes a stream is not yet flow-control-ready until its caller calls
    /// `unblock`), with no children, hence not yet active.
    pub fn new(id: StreamId, weight: Weight, parent: StreamId) -> Node {
        Node {
            id,
            weight,
            parent,
            blocked: true,
            active: false,
            last_virtual_finish: 0,
            children: Vec::new(),
        }
    }
}
