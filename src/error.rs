//! Error taxonomy for priority tree operations.
//!
//! Every invalid input is classified into an [`ErrorKind`] and rejected
//! before any mutation is attempted, so a failed operation never leaves the
//! tree in a partially-updated state.

use std::error;
use std::fmt;

use crate::StreamId;

/// The distinguishable ways a [`PriorityTree`](crate::PriorityTree) operation
/// can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Inserting a stream id that is already present.
    DuplicateStream,
    /// Naming a stream id that does not exist.
    MissingStream,
    /// Insertion would exceed the configured `maximum_streams` cap.
    TooManyStreams,
    /// A weight outside of `[1, 256]`.
    BadWeight,
    /// An attempt to reprioritize, remove, block or unblock stream `0`.
    PseudoStreamError,
    /// A dependency that would make a stream its own ancestor.
    PriorityLoop,
    /// `maximum_streams` was not a positive integer at construction.
    BadTreeConfig,
    /// No user stream is active; the iterator has nothing to yield.
    Deadlock,
}

/// An error produced by a [`PriorityTree`](crate::PriorityTree) operation.
///
/// Carries the classified [`ErrorKind`] plus, where applicable, the stream id
/// the failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    stream_id: Option<StreamId>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, stream_id: Option<StreamId>) -> Error {
        Error { kind, stream_id }
    }

    pub(crate) fn kind_only(kind: ErrorKind) -> Error {
        Error::new(kind, None)
    }

    pub(crate) fn for_stream(kind: ErrorKind, stream_id: StreamId) -> Error {
        Error::new(kind, Some(stream_id))
    }

    /// The classified kind of the failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The stream id the failure refers to, if the kind carries one.
    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream_id
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self.kind {
            ErrorKind::DuplicateStream => "stream already exists",
            ErrorKind::MissingStream => "stream does not exist",
            ErrorKind::TooManyStreams => "maximum_streams cap reached",
            ErrorKind::BadWeight => "weight out of range [1, 256]",
            ErrorKind::PseudoStreamError => {
                "stream 0 is the pseudo-stream and cannot be mutated"
            }
            ErrorKind::PriorityLoop => {
                "stream cannot depend on itself or its own descendant"
            }
            ErrorKind::BadTreeConfig => "maximum_streams must be a positive integer",
            ErrorKind::Deadlock => "no active stream can be served",
        };
        match self.stream_id {
            Some(id) => write!(f, "{} (stream {})", message, id),
            None => write!(f, "{}", message),
        }
    }
}

impl error::Error for Error {}
