//! Binary layout of graph headers and adjacency records.
//!
//! A record is `[degree: u32][neighbor: u32] × degree`, little-endian, with no
//! padding. Blocks are runs of whole records; decoding a block never consumes
//! a record that straddles its end.

use serde::Serialize;

use crate::primitives::bytes::{buf::Cursor, le};
use crate::types::{GraphError, NodeId, Result};

/// Length of the `n, m` header shared by every format.
pub const HEADER_LEN: usize = 16;
/// Width of the degree word and of each neighbor id.
pub const WORD_LEN: usize = le::U32_LEN;
/// Node ids are `u32`, so `n` may be at most `2^32`.
pub const MAX_NODES: u64 = 1 << 32;
/// Largest accepted edge count.
pub const MAX_EDGES: u64 = 1 << 60;

/// On-disk representation of a graph.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphFormat {
    /// Header followed by records, no index.
    Flat,
    /// Header, block count, `(offset, first id)` pairs, then records.
    IndexedSingleFile,
    /// Directory of numbered block files plus summary file `0`.
    IndexedSharded,
}

impl std::fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GraphFormat::Flat => "flat",
            GraphFormat::IndexedSingleFile => "indexed",
            GraphFormat::IndexedSharded => "sharded",
        };
        f.write_str(name)
    }
}

/// Node and edge counts found at the start of every graph file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GraphHeader {
    /// Number of nodes.
    pub n: u64,
    /// Number of edges.
    pub m: u64,
}

impl GraphHeader {
    /// Builds a header, rejecting counts beyond the supported range.
    pub fn new(n: u64, m: u64) -> Result<Self> {
        let header = Self { n, m };
        header.validate()?;
        Ok(header)
    }

    /// Checks `n` and `m` against [`MAX_NODES`] and [`MAX_EDGES`].
    pub fn validate(&self) -> Result<()> {
        if self.n > MAX_NODES {
            return Err(GraphError::FormatLimitExceeded {
                what: "node count",
                value: self.n,
                limit: MAX_NODES,
            });
        }
        if self.m > MAX_EDGES {
            return Err(GraphError::FormatLimitExceeded {
                what: "edge count",
                value: self.m,
                limit: MAX_EDGES,
            });
        }
        Ok(())
    }

    /// Appends the encoded header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        le::push_u64(out, self.n);
        le::push_u64(out, self.m);
    }

    /// Decodes and validates a header from the first [`HEADER_LEN`] bytes.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(src);
        let n = cur.u64("graph header")?;
        let m = cur.u64("graph header")?;
        Self::new(n, m)
    }
}

/// Encoded size of a record with `degree` neighbors.
#[inline]
pub fn record_len(degree: u32) -> u64 {
    WORD_LEN as u64 * (1 + degree as u64)
}

/// Borrowed view of one vertex record inside a block buffer.
///
/// The view lives only as long as the buffer borrow; callers that need the
/// adjacency after the owning lane swaps blocks must call [`Self::to_vec`].
#[derive(Copy, Clone, Debug)]
pub struct VertexRecord<'a> {
    degree: u32,
    neighbors: &'a [u8],
}

impl<'a> VertexRecord<'a> {
    /// Out-degree of the vertex.
    #[inline]
    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Iterates the neighbor ids in stored order.
    #[inline]
    pub fn neighbors(&self) -> Neighbors<'a> {
        Neighbors {
            chunks: self.neighbors.chunks_exact(WORD_LEN),
        }
    }

    /// Copies the adjacency list out of the block buffer.
    pub fn to_vec(&self) -> Vec<NodeId> {
        self.neighbors().collect()
    }
}

/// Iterator over the neighbor ids of a [`VertexRecord`].
#[derive(Clone, Debug)]
pub struct Neighbors<'a> {
    chunks: std::slice::ChunksExact<'a, u8>,
}

impl<'a> Iterator for Neighbors<'a> {
    type Item = NodeId;

    #[inline]
    fn next(&mut self) -> Option<NodeId> {
        self.chunks
            .next()
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Neighbors<'_> {}

/// Walks the whole records at the front of a block buffer.
#[derive(Debug)]
pub struct RecordDecoder<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> RecordDecoder<'a> {
    /// Bytes consumed so far; the first unconsumed record starts here.
    pub fn consumed(&self) -> usize {
        self.off
    }

    /// Returns true once no further whole record fits in the window.
    pub fn is_exhausted(&self) -> bool {
        peek_record_len(self.buf, self.off).map_or(true, |len| self.off + len > self.buf.len())
    }
}

impl<'a> Iterator for RecordDecoder<'a> {
    type Item = VertexRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (record, len) = decode_record(self.buf, self.off)?;
        self.off += len;
        Some(record)
    }
}

/// Decodes the records contained in `buffer[..byte_count]`.
///
/// A record that would extend past `byte_count` is left unconsumed.
pub fn decode_block(buffer: &[u8], byte_count: usize) -> RecordDecoder<'_> {
    RecordDecoder {
        buf: &buffer[..byte_count.min(buffer.len())],
        off: 0,
    }
}

/// Decodes the record starting at `off`, returning it with its encoded length.
#[inline]
pub fn decode_record(buf: &[u8], off: usize) -> Option<(VertexRecord<'_>, usize)> {
    let degree = le::get_u32(buf, off)?;
    let len = usize::try_from(record_len(degree)).ok()?;
    let end = off.checked_add(len)?;
    if end > buf.len() {
        return None;
    }
    Some((
        VertexRecord {
            degree,
            neighbors: &buf[off + WORD_LEN..end],
        },
        len,
    ))
}

fn peek_record_len(buf: &[u8], off: usize) -> Option<usize> {
    le::get_u32(buf, off).and_then(|deg| usize::try_from(record_len(deg)).ok())
}

/// Appends one encoded record to `out`.
pub fn encode_record(out: &mut Vec<u8>, neighbors: &[NodeId]) -> Result<()> {
    let degree = u32::try_from(neighbors.len()).map_err(|_| GraphError::FormatLimitExceeded {
        what: "degree",
        value: neighbors.len() as u64,
        limit: u32::MAX as u64,
    })?;
    out.reserve(record_len(degree) as usize);
    le::push_u32(out, degree);
    for &dst in neighbors {
        le::push_u32(out, dst);
    }
    Ok(())
}

/// Encodes a run of adjacency lists as one block.
pub fn encode_block<'r, I>(records: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'r [NodeId]>,
{
    let mut out = Vec::new();
    for neighbors in records {
        encode_record(&mut out, neighbors)?;
    }
    Ok(out)
}

/// Shape of the whole-record prefix of a chunk.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RecordPrefix {
    /// Length in bytes of the whole records.
    pub bytes: usize,
    /// Number of records.
    pub records: u64,
    /// Sum of their degrees.
    pub edges: u64,
}

/// Finds the largest prefix of `chunk` made of whole records.
///
/// `base` is the chunk's offset in its file and only feeds error messages.
/// When `at_eof` is set the chunk holds everything left in the file, so
/// leftover bytes can never be completed and are reported as
/// [`GraphError::TruncatedRecord`]. Otherwise leftovers are a block-boundary
/// split to be re-read as the start of the next chunk.
pub fn whole_record_prefix(chunk: &[u8], base: u64, at_eof: bool) -> Result<RecordPrefix> {
    let mut prefix = RecordPrefix::default();
    while let Some((record, len)) = decode_record(chunk, prefix.bytes) {
        prefix.bytes += len;
        prefix.records += 1;
        prefix.edges += record.degree() as u64;
    }
    if at_eof && prefix.bytes < chunk.len() {
        let available = (chunk.len() - prefix.bytes) as u64;
        let degree = le::get_u32(chunk, prefix.bytes).unwrap_or(0);
        let needed = if available < WORD_LEN as u64 {
            WORD_LEN as u64
        } else {
            record_len(degree)
        };
        return Err(GraphError::TruncatedRecord {
            offset: base + prefix.bytes as u64,
            degree,
            needed,
            available,
        });
    }
    Ok(prefix)
}
