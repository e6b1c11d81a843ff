//! An implementation of the stream-priority tree described in RFC 7540
//! §5.3: a dynamic, weighted forest of HTTP/2 streams that decides, on
//! demand, which active stream should transmit next.
//!
//! Every stream depends on exactly one other stream (or implicitly on the
//! connection itself) and carries a weight in `[1, 256]`; siblings receive
//! transmission opportunities in proportion to their relative weights, and a
//! stream that is flow-control-blocked but has an active descendant still
//! counts as active for its ancestors' purposes. See [`PriorityTree`] for
//! the full operation set.
//!
//! ```
//! use h2priority::PriorityTree;
//!
//! let mut tree = PriorityTree::new(100).unwrap();
//! tree.insert_stream(1, None, 16, false).unwrap();
//! tree.insert_stream(3, None, 48, false).unwrap();
//! tree.unblock(1).unwrap();
//! tree.unblock(3).unwrap();
//!
//! let served = tree.next().unwrap();
//! assert!(served == 1 || served == 3);
//! ```

#[macro_use]
extern crate log;

mod error;
mod iter;
mod node;
mod scheduler;
mod tree;

pub use crate::error::{Error, ErrorKind};
pub use crate::tree::{PriorityTree, DEFAULT_MAXIMUM_STREAMS};

/// A stream identifier. `0` is reserved for the implicit connection-level
/// root and is never a valid id for a user-inserted stream.
pub type StreamId = u32;

/// A relative priority weight, valid in the inclusive range `[1, 256]`.
pub type Weight = u16;

/// The weight RFC 7540 assigns a stream when none is given explicitly.
pub const DEFAULT_WEIGHT: Weight = 16;

/// The result type returned by every fallible [`PriorityTree`] operation.
pub type Result<T> = std::result::Result<T, Error>;
