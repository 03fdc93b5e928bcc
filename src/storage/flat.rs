//! Sequential access to flat graph files.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::format::{encode_record, record_len, GraphHeader, HEADER_LEN, WORD_LEN};
use crate::types::{GraphError, NodeId, Result};

/// Streams adjacency lists into a new flat graph file.
///
/// The header is written as zeros first and patched by [`FlatWriter::finish`].
pub struct FlatWriter {
    path: PathBuf,
    out: BufWriter<File>,
    scratch: Vec<u8>,
    n: u64,
    m: u64,
}

impl FlatWriter {
    /// Creates (or truncates) `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| GraphError::open(&path, source))?;
        let mut out = BufWriter::new(file);
        out.write_all(&[0u8; HEADER_LEN])?;
        Ok(Self {
            path,
            out,
            scratch: Vec::new(),
            n: 0,
            m: 0,
        })
    }

    /// Appends the adjacency list of node `self.nodes()`.
    pub fn push(&mut self, neighbors: &[NodeId]) -> Result<NodeId> {
        let id = NodeId::try_from(self.n).map_err(|_| GraphError::FormatLimitExceeded {
            what: "node count",
            value: self.n + 1,
            limit: super::format::MAX_NODES,
        })?;
        self.scratch.clear();
        encode_record(&mut self.scratch, neighbors)?;
        self.out.write_all(&self.scratch)?;
        self.n += 1;
        self.m += neighbors.len() as u64;
        Ok(id)
    }

    /// Number of records written so far.
    pub fn nodes(&self) -> u64 {
        self.n
    }

    /// Flushes the records and writes the final header.
    pub fn finish(self) -> Result<GraphHeader> {
        let header = GraphHeader::new(self.n, self.m)?;
        let mut file = self
            .out
            .into_inner()
            .map_err(|err| GraphError::Io(err.into_error()))?;
        let mut raw = Vec::with_capacity(HEADER_LEN);
        header.encode(&mut raw);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&raw)?;
        file.sync_all()?;
        debug!(path = %self.path.display(), n = header.n, m = header.m, "flat graph written");
        Ok(header)
    }
}

/// Writes a whole flat graph from in-memory adjacency lists.
pub fn write_flat<L>(path: impl AsRef<Path>, lists: &[L]) -> Result<GraphHeader>
where
    L: AsRef<[NodeId]>,
{
    let mut writer = FlatWriter::create(path)?;
    for list in lists {
        writer.push(list.as_ref())?;
    }
    writer.finish()
}

/// Reads a flat graph one owned record at a time.
///
/// All lookahead state lives in the reader, so independent readers over
/// different graphs never interfere.
pub struct FlatReader {
    input: BufReader<File>,
    header: GraphHeader,
    file_len: u64,
    offset: u64,
    next_node: u64,
}

impl FlatReader {
    /// Opens `path` and decodes its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| GraphError::open(path, source))?;
        let file_len = file.metadata()?.len();
        let mut input = BufReader::new(file);
        let mut raw = [0u8; HEADER_LEN];
        input.read_exact(&mut raw).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                GraphError::Corruption(format!("{} is shorter than a graph header", path.display()))
            } else {
                GraphError::Io(err)
            }
        })?;
        let header = GraphHeader::decode(&raw)?;
        Ok(Self {
            input,
            header,
            file_len,
            offset: HEADER_LEN as u64,
            next_node: 0,
        })
    }

    /// Node and edge counts from the file header.
    pub fn header(&self) -> GraphHeader {
        self.header
    }

    /// Returns the next `(id, adjacency)` pair, or `None` after node `n - 1`.
    pub fn next_node(&mut self) -> Result<Option<(NodeId, Vec<NodeId>)>> {
        if self.next_node >= self.header.n {
            return Ok(None);
        }
        let mut word = [0u8; WORD_LEN];
        self.read_exact_at_record(&mut word, 0)?;
        let degree = u32::from_le_bytes(word);
        let needed = record_len(degree);
        let available = self.file_len.saturating_sub(self.offset);
        if needed > available {
            return Err(GraphError::TruncatedRecord {
                offset: self.offset,
                degree,
                needed,
                available,
            });
        }
        let mut body = vec![0u8; degree as usize * WORD_LEN];
        self.read_exact_at_record(&mut body, degree)?;
        let neighbors = body
            .chunks_exact(WORD_LEN)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let id = self.next_node as NodeId;
        self.offset += needed;
        self.next_node += 1;
        Ok(Some((id, neighbors)))
    }

    fn read_exact_at_record(&mut self, dst: &mut [u8], degree: u32) -> Result<()> {
        self.input.read_exact(dst).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                GraphError::TruncatedRecord {
                    offset: self.offset,
                    degree,
                    needed: record_len(degree),
                    available: self.file_len.saturating_sub(self.offset),
                }
            } else {
                GraphError::Io(err)
            }
        })
    }

    /// Moves back to node 0.
    pub fn rewind(&mut self) -> Result<()> {
        self.input.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        self.offset = HEADER_LEN as u64;
        self.next_node = 0;
        Ok(())
    }
}
