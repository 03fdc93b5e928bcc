//! Per-lane cursors over the static block partition.
//!
//! Lane `l` of `L` owns blocks `l+1, l+1+L, l+1+2L, ...`. A cursor walks the
//! records of its current block and, on [`LaneCursor::advance`], steps by `L`.
//! Stepping past the last block wraps back to block `l+1`, which ends the
//! lane's epoch. Because wrapping leaves block `l+1` loaded, the next epoch
//! starts without I/O.

use serde::Serialize;

use super::format::{decode_record, VertexRecord};
use super::graph::Graph;
use super::prefetch::BlockFeed;
use crate::types::{BlockNo, GraphError, NodeId, Result};

/// Where a cursor is in its epoch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LaneState {
    /// No block loaded yet.
    AwaitingBlock,
    /// Records of the current block are being handed out.
    ReadingBlock,
    /// The lane wrapped back to its first block.
    EpochDone,
}

/// Work a lane did during one epoch.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct LaneStats {
    /// Blocks visited.
    pub blocks: u64,
    /// Records visited.
    pub nodes: u64,
    /// Sum of visited degrees.
    pub edges: u64,
}

impl std::ops::AddAssign for LaneStats {
    fn add_assign(&mut self, rhs: Self) {
        self.blocks += rhs.blocks;
        self.nodes += rhs.nodes;
        self.edges += rhs.edges;
    }
}

/// Iteration state of one lane.
#[derive(Debug)]
pub struct LaneCursor<'g> {
    graph: &'g Graph,
    lane: usize,
    state: LaneState,
    block_no: BlockNo,
    current: Vec<u8>,
    len: usize,
    offset: usize,
    node: u64,
    end: u64,
    spare: Option<Vec<u8>>,
}

impl<'g> LaneCursor<'g> {
    /// Creates the cursor of `lane` with both buffers preallocated.
    pub fn new(graph: &'g Graph, lane: usize) -> Result<Self> {
        if lane >= graph.lanes() {
            return Err(GraphError::InvalidArgument(format!(
                "lane {lane} outside 0..{}",
                graph.lanes()
            )));
        }
        let cap = graph.max_block_len();
        Ok(Self {
            graph,
            lane,
            state: LaneState::AwaitingBlock,
            block_no: 0,
            current: Vec::with_capacity(cap),
            len: 0,
            offset: 0,
            node: 0,
            end: 0,
            spare: Some(Vec::with_capacity(cap)),
        })
    }

    /// One cursor per lane of `graph`.
    pub fn for_graph(graph: &'g Graph) -> Result<Vec<Self>> {
        (0..graph.lanes()).map(|lane| Self::new(graph, lane)).collect()
    }

    /// Lane index.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Current state.
    pub fn state(&self) -> LaneState {
        self.state
    }

    /// Block currently loaded, `0` before the first load.
    pub fn block_no(&self) -> BlockNo {
        self.block_no
    }

    /// Id the next record will carry.
    pub fn current_node(&self) -> u64 {
        self.node
    }

    fn first_block(&self) -> BlockNo {
        self.lane as BlockNo + 1
    }

    fn successor(&self, block_no: BlockNo) -> BlockNo {
        let next = block_no + self.graph.lanes() as BlockNo;
        if next > self.graph.block_count() {
            self.first_block()
        } else {
            next
        }
    }

    fn install(&mut self, block_no: BlockNo, len: usize) -> Result<()> {
        let (first, end) = self.graph.block_span(block_no)?;
        self.block_no = block_no;
        self.len = len;
        self.offset = 0;
        self.node = first;
        self.end = end;
        Ok(())
    }

    fn prefetch_successor(&mut self, feed: &mut BlockFeed<'_>) -> Result<()> {
        let next = self.successor(self.block_no);
        if next == self.block_no {
            return Ok(());
        }
        let buf = self.spare.take().unwrap_or_default();
        feed.request(next, buf)
    }

    /// Makes the lane's first block current and requests the one after it.
    pub fn begin_epoch(&mut self, feed: &mut BlockFeed<'_>) -> Result<()> {
        match self.state {
            LaneState::AwaitingBlock => {
                let first = self.first_block();
                let len = self.graph.load_block(first, &mut self.current)?;
                self.install(first, len)?;
            }
            LaneState::EpochDone => {
                let first = self.block_no;
                self.install(first, self.len)?;
            }
            LaneState::ReadingBlock => {
                return Err(GraphError::InvalidArgument(format!(
                    "lane {} began an epoch while reading block {}",
                    self.lane, self.block_no
                )));
            }
        }
        self.state = LaneState::ReadingBlock;
        self.prefetch_successor(feed)
    }

    /// Decodes the next record of the current block.
    ///
    /// `None` means the block is exhausted and [`Self::advance`] should be
    /// called. The returned view borrows the cursor's buffer.
    pub fn next_node(&mut self) -> Result<Option<(NodeId, VertexRecord<'_>)>> {
        if self.state != LaneState::ReadingBlock {
            return Ok(None);
        }
        if self.offset >= self.len {
            if self.node != self.end {
                return Err(GraphError::Corruption(format!(
                    "block {} ended at node {} but the next block starts at {}",
                    self.block_no, self.node, self.end
                )));
            }
            return Ok(None);
        }
        let block = &self.current[..self.len];
        let Some((record, consumed)) = decode_record(block, self.offset) else {
            return Err(GraphError::Corruption(format!(
                "block {} has a partial record at byte {}",
                self.block_no, self.offset
            )));
        };
        if self.node >= self.end {
            return Err(GraphError::Corruption(format!(
                "block {} holds more records than its id range [.., {})",
                self.block_no, self.end
            )));
        }
        let n = self.graph.n();
        if let Some(bad) = record.neighbors().find(|&dst| dst as u64 >= n) {
            return Err(GraphError::Corruption(format!(
                "node {} has neighbor {bad} outside [0, {n})",
                self.node
            )));
        }
        let id = self.node as NodeId;
        self.offset += consumed;
        self.node += 1;
        Ok(Some((id, record)))
    }

    /// Moves to the lane's next block.
    ///
    /// Returns `false` when the lane wrapped and its epoch is over.
    pub fn advance(&mut self, feed: &mut BlockFeed<'_>) -> Result<bool> {
        let next = self.successor(self.block_no);
        if next == self.block_no {
            self.state = LaneState::EpochDone;
            return Ok(false);
        }
        let loaded = feed.wait()?;
        if loaded.block_no != next {
            return Err(GraphError::Corruption(format!(
                "lane {} expected block {next}, received {}",
                self.lane, loaded.block_no
            )));
        }
        let previous = std::mem::replace(&mut self.current, loaded.buf);
        self.spare = Some(previous);
        self.install(next, loaded.len)?;
        if next == self.first_block() {
            self.state = LaneState::EpochDone;
            return Ok(false);
        }
        self.state = LaneState::ReadingBlock;
        self.prefetch_successor(feed)?;
        Ok(true)
    }

    /// Runs one full epoch, calling `visit` for every record of the lane.
    pub fn run_epoch<F>(&mut self, feed: &mut BlockFeed<'_>, mut visit: F) -> Result<LaneStats>
    where
        F: FnMut(NodeId, VertexRecord<'_>),
    {
        let mut stats = LaneStats::default();
        self.begin_epoch(feed)?;
        loop {
            stats.blocks += 1;
            while let Some((id, record)) = self.next_node()? {
                stats.nodes += 1;
                stats.edges += record.degree() as u64;
                visit(id, record);
            }
            if !self.advance(feed)? {
                break;
            }
        }
        Ok(stats)
    }
}
