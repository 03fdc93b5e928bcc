//! Block storage and iteration.
//!
//! Graphs are stored as runs of adjacency records cut into blocks. This module
//! owns the on-disk formats, the indexer that builds them, the graph handle,
//! the per-lane cursors with their prefetchers, and the per-node vectors the
//! vertex programs write into.

/// Header and record encoding.
pub mod format;

/// Sequential flat-file writer and reader.
pub mod flat;

/// Block index construction and parsing.
///
/// Builds indexed single-file and sharded graphs from flat ones.
pub mod index;

/// Per-lane block cursors.
pub mod lane;

/// Background block readers.
pub mod prefetch;

/// Atomic per-node vectors, in memory or memory-mapped.
pub mod vector;

mod graph;
mod options;

pub use format::{GraphFormat, GraphHeader, VertexRecord};
pub use graph::{Graph, VerifyReport};
pub use index::{build_index, partition, BlockIndex, BlockIndexEntry, BlockLocator, BuildSummary};
pub use lane::{LaneCursor, LaneState, LaneStats};
pub use options::{GraphOptions, PrefetchMode, DEFAULT_LANES};
pub use prefetch::{BlockFeed, Prefetcher};
pub use vector::{NumericVector, VectorBacking, VectorOptions};
