//! Block indexes: building them from flat graphs and reading them back.
//!
//! The indexer streams a flat file in chunks of at most `block_bytes`, keeps
//! the whole-record prefix of each chunk as one block, and resumes at the
//! first unconsumed byte. Index tables grow with the graph; there is no fixed
//! block ceiling.

use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::format::{
    record_len, whole_record_prefix, GraphFormat, GraphHeader, HEADER_LEN, WORD_LEN,
};
use crate::primitives::bytes::{buf::Cursor, le};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{BlockNo, GraphError, NodeId, Result};

/// Length of the `n, m, blockCount` prefix of indexed headers.
pub const INDEXED_HEADER_LEN: usize = HEADER_LEN + le::U64_LEN;
/// Width of one `(u64 offset, u32 first id)` pair in a single-file index.
pub const INDEX_PAIR_LEN: usize = le::U64_LEN + le::U32_LEN;
/// Name of the summary file inside a sharded graph directory.
pub const SHARD_SUMMARY: &str = "0";
/// Default block byte budget (16 MiB).
pub const DEFAULT_BLOCK_BYTES: usize = 16 * 1024 * 1024;

/// Where a block's bytes live.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlockLocator {
    /// Absolute byte offset inside the graph file.
    Offset(u64),
    /// Standalone shard file.
    Shard(PathBuf),
}

/// One row of a block index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockIndexEntry {
    /// One-based block number.
    pub block_no: BlockNo,
    /// Location of the block's bytes.
    pub locator: BlockLocator,
    /// Length of the block in bytes.
    pub len: u64,
    /// Id of the first node stored in the block.
    pub first_node: NodeId,
}

/// Read-only table of a graph's blocks, ordered by block number.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockIndex {
    entries: Vec<BlockIndexEntry>,
}

impl BlockIndex {
    /// Wraps entries numbered `1..=len` in order.
    pub fn from_entries(entries: Vec<BlockIndexEntry>) -> Self {
        Self { entries }
    }

    /// Number of blocks.
    pub fn block_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// All entries in block order.
    pub fn entries(&self) -> &[BlockIndexEntry] {
        &self.entries
    }

    /// Entry for a one-based block number.
    pub fn get(&self, block_no: BlockNo) -> Option<&BlockIndexEntry> {
        let idx = block_no.checked_sub(1)?;
        self.entries.get(usize::try_from(idx).ok()?)
    }

    /// First node ids in block order.
    pub fn first_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|e| e.first_node)
    }

    /// Half-open id range `[first, end)` stored in `block_no`.
    pub fn node_span(&self, block_no: BlockNo, n: u64) -> Option<(u64, u64)> {
        let entry = self.get(block_no)?;
        let end = self
            .get(block_no + 1)
            .map_or(n, |next| next.first_node as u64);
        Some((entry.first_node as u64, end))
    }

    /// Largest block length, used to size lane buffers.
    pub fn max_block_len(&self) -> u64 {
        self.entries.iter().map(|e| e.len).max().unwrap_or(0)
    }

    /// Checks that first ids start at 0, strictly increase and stay below `n`.
    pub fn validate(&self, n: u64) -> Result<()> {
        let mut expected_no = 1;
        let mut prev: Option<NodeId> = None;
        for entry in &self.entries {
            if entry.block_no != expected_no {
                return Err(GraphError::Corruption(format!(
                    "block index out of order: expected block {expected_no}, found {}",
                    entry.block_no
                )));
            }
            match prev {
                None if entry.first_node != 0 => {
                    return Err(GraphError::Corruption(format!(
                        "first block starts at node {} instead of 0",
                        entry.first_node
                    )));
                }
                Some(p) if entry.first_node <= p => {
                    return Err(GraphError::Corruption(format!(
                        "block {} first node {} does not follow {p}",
                        entry.block_no, entry.first_node
                    )));
                }
                _ => {}
            }
            if entry.first_node as u64 >= n {
                return Err(GraphError::Corruption(format!(
                    "block {} first node {} is outside [0, {n})",
                    entry.block_no, entry.first_node
                )));
            }
            prev = Some(entry.first_node);
            expected_no += 1;
        }
        if n > 0 && self.entries.is_empty() {
            return Err(GraphError::Corruption(format!(
                "graph declares {n} nodes but has no blocks"
            )));
        }
        Ok(())
    }
}

/// Outcome of [`build_index`] or [`partition`].
#[derive(Clone, Debug, Serialize)]
pub struct BuildSummary {
    /// Format that was written.
    pub format: GraphFormat,
    /// Output file or directory.
    pub output: PathBuf,
    /// Node count.
    pub n: u64,
    /// Edge count from the header.
    pub m: u64,
    /// Number of blocks produced.
    pub blocks: u64,
    /// Byte budget the blocks were cut to.
    pub block_bytes: usize,
}

/// A block cut from a flat file, handed to the scan callback.
struct ScannedBlock<'a> {
    block_no: BlockNo,
    /// Offset of the block inside the flat file.
    offset: u64,
    first_node: NodeId,
    bytes: &'a [u8],
}

fn check_block_bytes(block_bytes: usize) -> Result<()> {
    if block_bytes < WORD_LEN {
        return Err(GraphError::InvalidArgument(format!(
            "block budget must be at least {WORD_LEN} bytes, got {block_bytes}"
        )));
    }
    Ok(())
}

/// Rejects an output that names the input graph, however the path is spelled.
fn refuse_overwrite(input: &Path, output: &Path) -> Result<()> {
    let same = match (fs::canonicalize(input), fs::canonicalize(output)) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    };
    if same {
        return Err(GraphError::InvalidArgument(format!(
            "output {} would overwrite the input graph",
            output.display()
        )));
    }
    Ok(())
}

/// Cuts `path` into blocks and feeds each one to `on_block`.
fn scan_flat<F>(path: &Path, block_bytes: usize, mut on_block: F) -> Result<GraphHeader>
where
    F: FnMut(ScannedBlock<'_>) -> Result<()>,
{
    check_block_bytes(block_bytes)?;
    let io = StdFileIo::open_read(path)?;
    let file_len = io.len()?;
    if file_len < HEADER_LEN as u64 {
        return Err(GraphError::Corruption(format!(
            "{} is shorter than a graph header",
            path.display()
        )));
    }
    let mut raw = [0u8; HEADER_LEN];
    io.read_at(0, &mut raw)?;
    let header = GraphHeader::decode(&raw)?;

    let mut chunk = vec![0u8; block_bytes];
    let mut pos = HEADER_LEN as u64;
    let mut next_node: u64 = 0;
    let mut edges: u64 = 0;
    let mut block_no: BlockNo = 0;
    while pos < file_len && next_node < header.n {
        let remaining = file_len - pos;
        let want = remaining.min(block_bytes as u64) as usize;
        let at_eof = remaining <= block_bytes as u64;
        io.read_at(pos, &mut chunk[..want])?;
        let prefix = whole_record_prefix(&chunk[..want], pos, at_eof)?;
        if prefix.records == 0 {
            let degree = le::get_u32(&chunk, 0).unwrap_or(0);
            let needed = record_len(degree);
            if needed > remaining {
                return Err(GraphError::TruncatedRecord {
                    offset: pos,
                    degree,
                    needed,
                    available: remaining,
                });
            }
            return Err(GraphError::FormatLimitExceeded {
                what: "record size",
                value: needed,
                limit: block_bytes as u64,
            });
        }
        block_no += 1;
        let first_node = NodeId::try_from(next_node).map_err(|_| {
            GraphError::Corruption(format!("block {block_no} starts past the last node id"))
        })?;
        debug!(
            block = block_no,
            offset = pos,
            bytes = prefix.bytes,
            first_node,
            records = prefix.records,
            "block cut"
        );
        on_block(ScannedBlock {
            block_no,
            offset: pos,
            first_node,
            bytes: &chunk[..prefix.bytes],
        })?;
        pos += prefix.bytes as u64;
        next_node += prefix.records;
        edges += prefix.edges;
    }

    if next_node != header.n {
        return Err(GraphError::Corruption(format!(
            "{} declares {} nodes but holds {next_node} records",
            path.display(),
            header.n
        )));
    }
    if pos != file_len {
        return Err(GraphError::Corruption(format!(
            "{} has {} trailing bytes after node {}",
            path.display(),
            file_len - pos,
            header.n
        )));
    }
    if edges != header.m {
        warn!(
            path = %path.display(),
            header_m = header.m,
            counted = edges,
            "edge count in header does not match degree sum"
        );
    }
    info!(path = %path.display(), n = header.n, m = header.m, blocks = block_no, "flat graph scanned");
    Ok(header)
}

/// Builds the in-memory block table of a flat graph.
pub fn scan_flat_blocks(path: &Path, block_bytes: usize) -> Result<(GraphHeader, BlockIndex)> {
    let mut entries = Vec::new();
    let header = scan_flat(path, block_bytes, |block| {
        entries.push(BlockIndexEntry {
            block_no: block.block_no,
            locator: BlockLocator::Offset(block.offset),
            len: block.bytes.len() as u64,
            first_node: block.first_node,
        });
        Ok(())
    })?;
    Ok((header, BlockIndex::from_entries(entries)))
}

/// Converts a flat graph into the indexed single-file format at `out`.
///
/// The scan records `(offset, first id)` for every block; the header and
/// index are then written followed by a streamed copy of the records.
pub fn build_index(
    flat_path: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
    block_bytes: usize,
) -> Result<BuildSummary> {
    let flat_path = flat_path.as_ref();
    let out_path = out_path.as_ref();
    refuse_overwrite(flat_path, out_path)?;
    let mut cuts: Vec<(u64, NodeId)> = Vec::new();
    let header = scan_flat(flat_path, block_bytes, |block| {
        cuts.push((block.offset, block.first_node));
        Ok(())
    })?;

    let blocks = cuts.len() as u64;
    let data_start = INDEXED_HEADER_LEN as u64 + blocks * INDEX_PAIR_LEN as u64;
    let file = File::create(out_path).map_err(|source| GraphError::open(out_path, source))?;
    let mut out = BufWriter::new(file);
    let mut raw = Vec::with_capacity(INDEXED_HEADER_LEN);
    header.encode(&mut raw);
    le::push_u64(&mut raw, blocks);
    out.write_all(&raw)?;
    let mut pair = [0u8; INDEX_PAIR_LEN];
    for &(flat_offset, first_node) in &cuts {
        let offset = data_start + (flat_offset - HEADER_LEN as u64);
        le::put_u64(&mut pair[..8], offset);
        le::put_u32(&mut pair[8..], first_node);
        out.write_all(&pair)?;
    }

    let mut input = File::open(flat_path).map_err(|source| GraphError::open(flat_path, source))?;
    input.seek(SeekFrom::Start(HEADER_LEN as u64))?;
    let copied = io::copy(&mut input, &mut out)?;
    out.flush()?;
    out.get_ref().sync_all()?;
    info!(
        output = %out_path.display(),
        blocks,
        record_bytes = copied,
        "indexed graph written"
    );
    Ok(BuildSummary {
        format: GraphFormat::IndexedSingleFile,
        output: out_path.to_path_buf(),
        n: header.n,
        m: header.m,
        blocks,
        block_bytes,
    })
}

/// Path of shard `block_no` inside `dir`.
pub fn shard_path(dir: &Path, block_no: BlockNo) -> PathBuf {
    dir.join(block_no.to_string())
}

/// Splits a flat graph into one file per block under `out_dir`.
pub fn partition(
    flat_path: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    block_bytes: usize,
) -> Result<BuildSummary> {
    let flat_path = flat_path.as_ref();
    let out_dir = out_dir.as_ref();
    refuse_overwrite(flat_path, out_dir)?;
    fs::create_dir_all(out_dir).map_err(|source| GraphError::open(out_dir, source))?;
    let mut first_nodes: Vec<NodeId> = Vec::new();
    let header = scan_flat(flat_path, block_bytes, |block| {
        let path = shard_path(out_dir, block.block_no);
        let mut file = File::create(&path).map_err(|source| GraphError::open(&path, source))?;
        file.write_all(block.bytes)?;
        first_nodes.push(block.first_node);
        Ok(())
    })?;

    let blocks = first_nodes.len() as u64;
    let mut summary = Vec::with_capacity(INDEXED_HEADER_LEN + first_nodes.len() * WORD_LEN);
    header.encode(&mut summary);
    le::push_u64(&mut summary, blocks);
    for &first in &first_nodes {
        le::push_u32(&mut summary, first);
    }
    let summary_path = out_dir.join(SHARD_SUMMARY);
    fs::write(&summary_path, &summary).map_err(|source| GraphError::open(&summary_path, source))?;
    info!(output = %out_dir.display(), blocks, "sharded graph written");
    Ok(BuildSummary {
        format: GraphFormat::IndexedSharded,
        output: out_dir.to_path_buf(),
        n: header.n,
        m: header.m,
        blocks,
        block_bytes,
    })
}

/// Reads the header and embedded index of an indexed single-file graph.
pub fn read_single_file_index(io: &dyn FileIo) -> Result<(GraphHeader, BlockIndex)> {
    let file_len = io.len()?;
    if file_len < INDEXED_HEADER_LEN as u64 {
        return Err(GraphError::Corruption(
            "indexed graph shorter than its header".into(),
        ));
    }
    let mut raw = [0u8; INDEXED_HEADER_LEN];
    io.read_at(0, &mut raw)?;
    let header = GraphHeader::decode(&raw)?;
    let blocks = Cursor::new(&raw[HEADER_LEN..]).u64("block count")?;
    let max_blocks = (file_len - INDEXED_HEADER_LEN as u64) / INDEX_PAIR_LEN as u64;
    if blocks > max_blocks {
        return Err(GraphError::FormatLimitExceeded {
            what: "block count",
            value: blocks,
            limit: max_blocks,
        });
    }
    let data_start = INDEXED_HEADER_LEN as u64 + blocks * INDEX_PAIR_LEN as u64;
    let mut table = vec![0u8; blocks as usize * INDEX_PAIR_LEN];
    io.read_at(INDEXED_HEADER_LEN as u64, &mut table)?;

    let mut cursor = Cursor::new(&table);
    let mut cuts = Vec::with_capacity(blocks as usize);
    for _ in 0..blocks {
        let offset = cursor.u64("index offset")?;
        let first = cursor.u32("index first node")?;
        cuts.push((offset, first));
    }
    let mut entries = Vec::with_capacity(cuts.len());
    for (i, &(offset, first_node)) in cuts.iter().enumerate() {
        let end = cuts.get(i + 1).map_or(file_len, |next| next.0);
        if i == 0 && offset != data_start {
            return Err(GraphError::Corruption(format!(
                "first block offset {offset} does not follow the index at {data_start}"
            )));
        }
        if end <= offset || end > file_len {
            return Err(GraphError::Corruption(format!(
                "block {} spans [{offset}, {end}) outside file of {file_len} bytes",
                i + 1
            )));
        }
        entries.push(BlockIndexEntry {
            block_no: i as BlockNo + 1,
            locator: BlockLocator::Offset(offset),
            len: end - offset,
            first_node,
        });
    }
    let index = BlockIndex::from_entries(entries);
    index.validate(header.n)?;
    Ok((header, index))
}

/// Reads summary file `0` of a sharded graph and sizes each shard.
///
/// Bytes after the first-node-id table are ignored.
pub fn read_shard_summary(dir: &Path) -> Result<(GraphHeader, BlockIndex)> {
    let summary_path = dir.join(SHARD_SUMMARY);
    let raw = fs::read(&summary_path).map_err(|source| GraphError::open(&summary_path, source))?;
    let header = GraphHeader::decode(&raw)?;
    let mut cursor = Cursor::new(&raw[HEADER_LEN.min(raw.len())..]);
    let blocks = cursor.u64("block count")?;
    let max_blocks = (cursor.remaining() / WORD_LEN) as u64;
    if blocks > max_blocks {
        return Err(GraphError::FormatLimitExceeded {
            what: "block count",
            value: blocks,
            limit: max_blocks,
        });
    }
    let mut entries = Vec::with_capacity(blocks as usize);
    for i in 0..blocks {
        let first_node = cursor.u32("first node table")?;
        let block_no = i + 1;
        let path = shard_path(dir, block_no);
        let len = fs::metadata(&path)
            .map_err(|source| GraphError::open(&path, source))?
            .len();
        entries.push(BlockIndexEntry {
            block_no,
            locator: BlockLocator::Shard(path),
            len,
            first_node,
        });
    }
    let index = BlockIndex::from_entries(entries);
    index.validate(header.n)?;
    Ok((header, index))
}
