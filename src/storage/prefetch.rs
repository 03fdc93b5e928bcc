//! Background block readers.
//!
//! A lane hands its spare buffer to a reader together with the number of the
//! block it needs next and later takes the filled buffer back out of its
//! mailbox. Buffers travel by value in both directions, so a lane's current
//! buffer is never reachable from a reader thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::Scope;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::graph::Graph;
use super::options::PrefetchMode;
use crate::types::{BlockNo, GraphError, Result};

/// A block read into an owned buffer.
#[derive(Debug)]
pub struct LoadedBlock {
    /// Block number the buffer holds.
    pub block_no: BlockNo,
    /// Buffer whose first `len` bytes are the block.
    pub buf: Vec<u8>,
    /// Valid length of `buf`.
    pub len: usize,
}

struct Request {
    lane: usize,
    block_no: BlockNo,
    buf: Vec<u8>,
}

/// Single-slot hand-off from a reader to one lane.
#[derive(Default)]
struct Mailbox {
    slot: Mutex<Option<Result<LoadedBlock>>>,
    ready: Condvar,
}

impl Mailbox {
    fn put(&self, outcome: Result<LoadedBlock>) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "mailbox overwritten before it was taken");
        *slot = Some(outcome);
        self.ready.notify_one();
    }

    fn take(&self) -> Result<LoadedBlock> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.ready.wait(&mut slot);
        }
    }
}

/// Per-epoch set of reader threads and lane mailboxes.
pub struct Prefetcher<'g> {
    graph: &'g Graph,
    mode: PrefetchMode,
    mailboxes: Vec<Mailbox>,
}

impl<'g> Prefetcher<'g> {
    /// Prepares mailboxes for every lane of `graph`.
    pub fn new(graph: &'g Graph, mode: PrefetchMode) -> Self {
        let mailboxes = (0..graph.lanes()).map(|_| Mailbox::default()).collect();
        Self {
            graph,
            mode,
            mailboxes,
        }
    }

    /// Spawns the reader threads on `scope` and returns one feed per lane.
    ///
    /// Readers exit once every feed has been dropped, so they are joined with
    /// the rest of the scope when the lanes finish.
    pub fn start<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
    ) -> Vec<BlockFeed<'env>> {
        let lanes = self.mailboxes.len();
        match self.mode {
            PrefetchMode::Off => (0..lanes)
                .map(|lane| BlockFeed::direct(self.graph, lane))
                .collect(),
            PrefetchMode::Shared => {
                let (tx, rx) = mpsc::channel();
                self.spawn_reader(scope, rx);
                (0..lanes)
                    .map(|lane| self.feed(lane, tx.clone()))
                    .collect()
            }
            PrefetchMode::PerLane => (0..lanes)
                .map(|lane| {
                    let (tx, rx) = mpsc::channel();
                    self.spawn_reader(scope, rx);
                    self.feed(lane, tx)
                })
                .collect(),
        }
    }

    fn feed(&self, lane: usize, tx: Sender<Request>) -> BlockFeed<'_> {
        BlockFeed {
            graph: self.graph,
            lane,
            channel: Some((tx, &self.mailboxes[lane])),
            pending: None,
            in_flight: None,
        }
    }

    fn spawn_reader<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        rx: Receiver<Request>,
    ) {
        scope.spawn(move || {
            while let Ok(Request {
                lane,
                block_no,
                mut buf,
            }) = rx.recv()
            {
                trace!(lane, block = block_no, "prefetch");
                let outcome = self
                    .graph
                    .load_block(block_no, &mut buf)
                    .map(|len| LoadedBlock { block_no, buf, len });
                self.mailboxes[lane].put(outcome);
            }
        });
    }
}

/// One lane's connection to its block source for the current epoch.
///
/// At most one block may be in flight at a time.
pub struct BlockFeed<'a> {
    graph: &'a Graph,
    lane: usize,
    channel: Option<(Sender<Request>, &'a Mailbox)>,
    pending: Option<(BlockNo, Vec<u8>)>,
    in_flight: Option<BlockNo>,
}

impl<'a> BlockFeed<'a> {
    /// A feed that reads synchronously on the calling thread.
    pub fn direct(graph: &'a Graph, lane: usize) -> Self {
        Self {
            graph,
            lane,
            channel: None,
            pending: None,
            in_flight: None,
        }
    }

    /// Lane this feed serves.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Block currently requested and not yet taken, if any.
    pub fn in_flight(&self) -> Option<BlockNo> {
        self.in_flight
    }

    /// Asks for `block_no` to be read into `buf`.
    pub fn request(&mut self, block_no: BlockNo, buf: Vec<u8>) -> Result<()> {
        if let Some(busy) = self.in_flight {
            return Err(GraphError::InvalidArgument(format!(
                "lane {} requested block {block_no} while block {busy} is in flight",
                self.lane
            )));
        }
        match &self.channel {
            Some((tx, _)) => tx
                .send(Request {
                    lane: self.lane,
                    block_no,
                    buf,
                })
                .map_err(|_| {
                    GraphError::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "prefetch reader exited",
                    ))
                })?,
            None => self.pending = Some((block_no, buf)),
        }
        self.in_flight = Some(block_no);
        Ok(())
    }

    /// Blocks until the requested block is available and takes ownership of it.
    pub fn wait(&mut self) -> Result<LoadedBlock> {
        let Some(expected) = self.in_flight.take() else {
            return Err(GraphError::InvalidArgument(format!(
                "lane {} waited with no block in flight",
                self.lane
            )));
        };
        let loaded = match &self.channel {
            Some((_, mailbox)) => mailbox.take()?,
            None => {
                let (block_no, mut buf) = self.pending.take().ok_or_else(|| {
                    GraphError::InvalidArgument("synchronous feed lost its request".into())
                })?;
                let len = self.graph.load_block(block_no, &mut buf)?;
                LoadedBlock { block_no, buf, len }
            }
        };
        debug_assert_eq!(loaded.block_no, expected);
        Ok(loaded)
    }
}
