//! Vertex programs and the epoch driver they share.
//!
//! An epoch runs every lane on its own thread inside one `std::thread::scope`,
//! together with the prefetch readers. Lanes scatter into shared atomic
//! vectors through an [`EdgeKernel`]; per-lane partial results come back when
//! the scope joins and are reduced by the caller.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::storage::{Graph, LaneCursor, LaneStats, Prefetcher, VertexRecord};
use crate::types::{NodeId, Result};

/// Connected components by label propagation.
pub mod components;
/// PageRank by power iteration.
pub mod pagerank;
/// Plain traversal.
pub mod scan;

pub use components::{components, ComponentsOptions, ComponentsReport, ComponentsRun};
pub use pagerank::{pagerank, PageRankOptions, PageRankReport, PageRankRun, Precision};
pub use scan::{scan, ScanReport};

/// Work applied to every visited record.
///
/// `visit` runs concurrently on all lanes; shared state must be atomic.
pub(crate) trait EdgeKernel: Sync {
    /// Lane-local accumulator, reduced after the epoch.
    type Partial: Default + Send;

    fn visit(&self, partial: &mut Self::Partial, id: NodeId, record: VertexRecord<'_>);
}

/// Results of one epoch, one entry per lane.
pub(crate) struct EpochOutcome<P> {
    pub(crate) lanes: Vec<(P, LaneStats)>,
}

impl<P> EpochOutcome<P> {
    pub(crate) fn totals(&self) -> LaneStats {
        let mut total = LaneStats::default();
        for (_, stats) in &self.lanes {
            total += *stats;
        }
        total
    }

    pub(crate) fn partials(&self) -> impl Iterator<Item = &P> {
        self.lanes.iter().map(|(p, _)| p)
    }
}

/// Runs one epoch of `kernel` across every lane of `graph`.
pub(crate) fn run_epoch<K: EdgeKernel>(
    graph: &Graph,
    cursors: &mut [LaneCursor<'_>],
    kernel: &K,
) -> Result<EpochOutcome<K::Partial>> {
    let prefetcher = Prefetcher::new(graph, graph.prefetch_mode());
    let lanes = thread::scope(|s| {
        let feeds = prefetcher.start(s);
        let handles: Vec<_> = cursors
            .iter_mut()
            .zip(feeds)
            .map(|(cursor, mut feed)| {
                s.spawn(move || {
                    let mut partial = K::Partial::default();
                    let stats = cursor.run_epoch(&mut feed, |id, record| {
                        kernel.visit(&mut partial, id, record)
                    })?;
                    Ok((partial, stats))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect::<Result<Vec<_>>>()
    })?;
    Ok(EpochOutcome { lanes })
}

/// Convergence measure reported after each iteration.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    /// L1 distance between successive PageRank vectors.
    Residual(f64),
    /// Labels lowered during the epoch.
    Propagations(u64),
}

/// Per-iteration statistics handed to observers.
#[derive(Copy, Clone, Debug, Serialize)]
pub struct IterationStats {
    /// One-based iteration number.
    pub iteration: usize,
    /// Convergence measure.
    pub progress: Progress,
    /// Records visited by all lanes.
    pub nodes: u64,
    /// Degree sum visited by all lanes.
    pub edges: u64,
    /// Wall time of the iteration including the reduction.
    pub elapsed: Duration,
}

impl fmt::Display for IterationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.progress {
            Progress::Residual(r) => write!(f, "{}: {:.6e}", self.iteration, r),
            Progress::Propagations(p) => write!(f, "{}: {}", self.iteration, p),
        }
    }
}

/// Observer that ignores every iteration.
pub fn quiet(_: &IterationStats) {}
