//! The immutable graph handle shared by every lane of a run.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::format::{decode_block, GraphFormat, GraphHeader};
use super::index::{
    read_shard_summary, read_single_file_index, scan_flat_blocks, BlockIndex, BlockLocator,
};
use super::options::{GraphOptions, PrefetchMode};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{BlockNo, GraphError, Result};

impl GraphFormat {
    /// Guesses the format of `path`.
    ///
    /// Directories are sharded graphs. A file is indexed when its embedded
    /// index validates against the file length, otherwise it is flat.
    pub fn detect(path: impl AsRef<Path>) -> Result<GraphFormat> {
        let path = path.as_ref();
        let meta = fs::metadata(path).map_err(|source| GraphError::open(path, source))?;
        if meta.is_dir() {
            return Ok(GraphFormat::IndexedSharded);
        }
        let io = StdFileIo::open_read(path)?;
        match read_single_file_index(&io) {
            Ok(_) => Ok(GraphFormat::IndexedSingleFile),
            Err(err) => {
                debug!(path = %path.display(), %err, "no embedded index, treating as flat");
                Ok(GraphFormat::Flat)
            }
        }
    }
}

/// Result of [`Graph::verify`].
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Node count from the header.
    pub n: u64,
    /// Edge count from the header.
    pub m: u64,
    /// Blocks scanned.
    pub blocks: u64,
    /// Records decoded.
    pub nodes_seen: u64,
    /// Sum of decoded degrees.
    pub edges_seen: u64,
}

/// A graph opened for iteration.
///
/// The handle never changes after [`Graph::open`]; lanes borrow it and load
/// their blocks through [`Graph::load_block`].
#[derive(Debug)]
pub struct Graph {
    path: PathBuf,
    format: GraphFormat,
    header: GraphHeader,
    index: BlockIndex,
    options: GraphOptions,
    file: Option<StdFileIo>,
}

impl Graph {
    /// Opens `path`, reading or building its block index.
    pub fn open(path: impl AsRef<Path>, options: GraphOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if options.lanes == 0 {
            return Err(GraphError::InvalidArgument(
                "lane count must be at least 1".into(),
            ));
        }
        let format = match options.format {
            Some(format) => format,
            None => GraphFormat::detect(&path)?,
        };
        let (header, index, file) = match format {
            GraphFormat::IndexedSharded => {
                let (header, index) = read_shard_summary(&path)?;
                (header, index, None)
            }
            GraphFormat::IndexedSingleFile => {
                let io = StdFileIo::open_read(&path)?;
                let (header, index) = read_single_file_index(&io)?;
                (header, index, Some(io))
            }
            GraphFormat::Flat => {
                let (header, index) = scan_flat_blocks(&path, options.block_bytes)?;
                (header, index, Some(StdFileIo::open_read(&path)?))
            }
        };
        if index.block_count() < options.lanes as u64 {
            return Err(GraphError::LaneCountMismatch {
                blocks: index.block_count(),
                lanes: options.lanes,
            });
        }
        info!(
            path = %path.display(),
            %format,
            n = header.n,
            m = header.m,
            blocks = index.block_count(),
            lanes = options.lanes,
            "graph opened"
        );
        Ok(Self {
            path,
            format,
            header,
            index,
            options,
            file,
        })
    }

    /// File or directory the graph was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format the graph was opened as.
    pub fn format(&self) -> GraphFormat {
        self.format
    }

    /// Node and edge counts.
    pub fn header(&self) -> GraphHeader {
        self.header
    }

    /// Number of nodes.
    pub fn n(&self) -> u64 {
        self.header.n
    }

    /// Number of edges.
    pub fn m(&self) -> u64 {
        self.header.m
    }

    /// Number of lanes.
    pub fn lanes(&self) -> usize {
        self.options.lanes
    }

    /// Prefetch strategy chosen at open.
    pub fn prefetch_mode(&self) -> PrefetchMode {
        self.options.prefetch
    }

    /// The block table.
    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    /// Number of blocks.
    pub fn block_count(&self) -> u64 {
        self.index.block_count()
    }

    /// Lane that owns `block_no`.
    pub fn lane_of(&self, block_no: BlockNo) -> usize {
        ((block_no - 1) % self.options.lanes as u64) as usize
    }

    /// Half-open node id range stored in `block_no`.
    pub fn block_span(&self, block_no: BlockNo) -> Result<(u64, u64)> {
        self.index
            .node_span(block_no, self.header.n)
            .ok_or_else(|| missing_block(block_no, self.block_count()))
    }

    /// Largest block length, the capacity lane buffers are allocated with.
    pub fn max_block_len(&self) -> usize {
        self.index.max_block_len() as usize
    }

    /// Replaces the contents of `buf` with block `block_no`.
    ///
    /// `buf` keeps its allocation when it is already large enough. Shard files
    /// are opened for the duration of the read only.
    pub fn load_block(&self, block_no: BlockNo, buf: &mut Vec<u8>) -> Result<usize> {
        let entry = self
            .index
            .get(block_no)
            .ok_or_else(|| missing_block(block_no, self.block_count()))?;
        let len = entry.len as usize;
        buf.clear();
        buf.resize(len, 0);
        match &entry.locator {
            BlockLocator::Offset(offset) => {
                let io = self.file.as_ref().ok_or_else(|| {
                    GraphError::Corruption(format!(
                        "block {block_no} has a file offset but the graph has no backing file"
                    ))
                })?;
                io.read_at(*offset, buf)?;
            }
            BlockLocator::Shard(path) => {
                let mut file = File::open(path).map_err(|source| GraphError::open(path, source))?;
                file.read_exact(buf)?;
            }
        }
        Ok(len)
    }

    /// Decodes every block in order and cross-checks it against the header.
    pub fn verify(&self) -> Result<VerifyReport> {
        let n = self.header.n;
        let mut buf = Vec::with_capacity(self.max_block_len());
        let mut nodes_seen = 0u64;
        let mut edges_seen = 0u64;
        for block_no in 1..=self.block_count() {
            let len = self.load_block(block_no, &mut buf)?;
            let (first, end) = self.block_span(block_no)?;
            if first != nodes_seen {
                return Err(GraphError::Corruption(format!(
                    "block {block_no} starts at node {first}, expected {nodes_seen}"
                )));
            }
            let mut records = decode_block(&buf, len);
            for record in records.by_ref() {
                let id = nodes_seen;
                for dst in record.neighbors() {
                    if dst as u64 >= n {
                        return Err(GraphError::Corruption(format!(
                            "node {id} has neighbor {dst} outside [0, {n})"
                        )));
                    }
                }
                edges_seen += record.degree() as u64;
                nodes_seen += 1;
            }
            if records.consumed() != len {
                return Err(GraphError::Corruption(format!(
                    "block {block_no} has {} bytes after its last whole record",
                    len - records.consumed()
                )));
            }
            if nodes_seen != end {
                return Err(GraphError::Corruption(format!(
                    "block {block_no} holds nodes [{first}, {nodes_seen}) but the index expects [{first}, {end})"
                )));
            }
        }
        if nodes_seen != n {
            return Err(GraphError::Corruption(format!(
                "blocks cover {nodes_seen} nodes, header declares {n}"
            )));
        }
        if edges_seen != self.header.m {
            return Err(GraphError::Corruption(format!(
                "degree sum {edges_seen} does not match edge count {}",
                self.header.m
            )));
        }
        Ok(VerifyReport {
            n,
            m: self.header.m,
            blocks: self.block_count(),
            nodes_seen,
            edges_seen,
        })
    }
}

fn missing_block(block_no: BlockNo, blocks: u64) -> GraphError {
    GraphError::InvalidArgument(format!("block {block_no} outside 1..={blocks}"))
}
