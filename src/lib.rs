//! Out-of-core graph analytics over block-partitioned adjacency files.
//!
//! Graphs are stored as degree-prefixed adjacency records grouped into
//! fixed-budget blocks. Blocks are statically assigned to a fixed number of
//! worker lanes, prefetched in the background, and consumed by the PageRank
//! and label-propagation kernels in [`program`].

#![warn(missing_docs)]

pub mod cli;
pub mod logging;
pub mod primitives;
pub mod program;
pub mod storage;
pub mod types;
