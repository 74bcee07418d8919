//! Error types for buffer windows, channels, transfers and sessions.

use thiserror::Error;

/// Main error type for all ferry operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A put needed more room than the window has between position and limit.
    #[error("buffer overflow: {requested} bytes requested, {remaining} remaining")]
    Overflow { requested: usize, remaining: usize },

    /// A get needed more bytes than the window has between position and limit.
    #[error("buffer underflow: {requested} bytes requested, {remaining} remaining")]
    Underflow { requested: usize, remaining: usize },

    /// `reset` was called without a prior `mark`.
    #[error("reset called without a mark")]
    InvalidMark,

    /// Windows must hold at least one byte.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(usize),

    #[error("position {position} exceeds limit {limit}")]
    InvalidPosition { position: usize, limit: usize },

    #[error("limit {limit} exceeds capacity {capacity}")]
    InvalidLimit { limit: usize, capacity: usize },

    /// Destination range does not fit in the destination slice.
    #[error("range {offset}+{length} out of bounds for length {len}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        len: usize,
    },

    /// A broadcast was given no sinks to deliver to.
    #[error("no sink channels given")]
    NoSinks,

    /// Source and destination resolve to the same file.
    #[error("source and destination are the same file: {}", .0.display())]
    SameFile(std::path::PathBuf),

    /// I/O attempted on a channel after `close`.
    #[error("channel is closed")]
    ClosedChannel,

    /// Write attempted through a read-only view, or a mapping mode the file
    /// was not opened for.
    #[error("access violation: {0}")]
    AccessViolation(&'static str),

    /// Underlying file or transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transfer aborted after moving `transferred` bytes.
    #[error("transfer failed after {transferred} bytes: {source}")]
    Transfer {
        transferred: u64,
        #[source]
        source: Box<Error>,
    },

    /// Session protocol violation (bad acknowledgement, illegal state change).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Bytes moved before a transfer failed, if this error came from one.
    pub fn transferred(&self) -> Option<u64> {
        match self {
            Error::Transfer { transferred, .. } => Some(*transferred),
            _ => None,
        }
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
