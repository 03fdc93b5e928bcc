#![forbid(unsafe_code)]
//! Shared identifiers and the crate-wide error type.

use std::io;
use std::path::PathBuf;

/// Dense node identifier in `[0, n)`.
pub type NodeId = u32;

/// One-based block number. Block `0` is reserved for the sharded summary file.
pub type BlockNo = u64;

/// Errors raised by storage, iteration and vertex programs.
///
/// Every variant is fatal for the current run.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    /// A graph, index or shard file could not be opened or read.
    #[error("could not open {}: {source}", path.display())]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// A count or size is outside the range the format supports.
    #[error("{what} {value} exceeds supported limit {limit}")]
    FormatLimitExceeded {
        /// Which quantity overflowed.
        what: &'static str,
        /// Observed value.
        value: u64,
        /// Largest supported value.
        limit: u64,
    },
    /// The graph has fewer blocks than there are lanes.
    #[error("graph has {blocks} blocks but {lanes} lanes were requested; each lane needs at least one block")]
    LaneCountMismatch {
        /// Number of blocks in the graph.
        blocks: u64,
        /// Number of lanes requested.
        lanes: usize,
    },
    /// A degree value implies more neighbor bytes than the file holds.
    #[error("truncated record at byte {offset}: degree {degree} needs {needed} bytes, {available} available")]
    TruncatedRecord {
        /// Byte offset of the record within its read window.
        offset: u64,
        /// Degree read at that offset.
        degree: u32,
        /// Bytes the record requires including its degree word.
        needed: u64,
        /// Bytes left in the file from that offset.
        available: u64,
    },
    /// On-disk structures are inconsistent with each other.
    #[error("corruption: {0}")]
    Corruption(String),
    /// A caller supplied an unusable parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Any other I/O failure.
    #[error("IO: {0}")]
    Io(#[from] io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    /// Wraps an I/O error raised while opening `path`.
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GraphError::Open {
            path: path.into(),
            source,
        }
    }
}
