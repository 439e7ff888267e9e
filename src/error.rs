//! Error types for padflow.
//!
//! Only contract violations and resource failures travel through [`Error`].
//! Negotiation outcomes, data-flow status and state-change verdicts have their
//! own return types (see [`crate::pad::PadLinkReturn`], [`crate::pad::FlowError`]
//! and [`crate::element::StateChangeError`]).

use crate::caps::CapsError;
use crate::element::StateChangeError;
use std::fmt;
use thiserror::Error;

/// Result type alias using padflow's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for padflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer pool is exhausted (no slots available).
    #[error("buffer pool exhausted: no slots available")]
    PoolExhausted,

    /// Memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Invalid memory segment operation.
    #[error("invalid memory segment: {0}")]
    InvalidSegment(String),

    /// A byte range does not fit inside its parent.
    #[error("range {offset}+{size} exceeds {len} available bytes")]
    OutOfBounds {
        /// Requested start offset.
        offset: usize,
        /// Requested size.
        size: usize,
        /// Bytes actually available.
        len: usize,
    },

    /// The operation was cancelled through a [`crate::io::Cancellable`].
    #[error("operation was cancelled")]
    Cancelled,

    /// The stream was already closed.
    #[error("stream is closed")]
    Closed,

    /// Malformed capability description.
    #[error(transparent)]
    Caps(#[from] CapsError),

    /// Pad contract violation (wrong direction, already linked, ...).
    #[error("pad error: {0}")]
    Pad(String),

    /// Element or bin contract violation.
    #[error("element error: {0}")]
    Element(String),

    /// A state change failed.
    #[error(transparent)]
    StateChange(#[from] StateChangeError),

    /// Unknown scheduler or element factory.
    #[error("no factory named '{0}'")]
    UnknownFactory(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

/// Domain of an error reported by an element on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// Core library misuse or internal failure.
    Core,
    /// Failure inside a helper library an element wraps.
    Library,
    /// Opening, reading, writing or mapping a resource failed.
    Resource,
    /// The data stream itself is broken or could not be negotiated.
    Stream,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorDomain::Core => "core",
            ErrorDomain::Library => "library",
            ErrorDomain::Resource => "resource",
            ErrorDomain::Stream => "stream",
        };
        f.write_str(s)
    }
}
