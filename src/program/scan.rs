use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use super::{run_epoch, EdgeKernel};
use crate::storage::{Graph, LaneCursor, VertexRecord};
use crate::types::{NodeId, Result};

/// What one traversal epoch touched.
#[derive(Clone, Debug, Serialize)]
pub struct ScanReport {
    /// Node count from the header.
    pub n: u64,
    /// Edge count from the header.
    pub m: u64,
    /// Blocks read.
    pub blocks: u64,
    /// Records visited.
    pub visited: u64,
    /// Sum of visited degrees.
    pub degree_sum: u64,
    /// Largest neighbor id seen.
    pub max_neighbor: Option<NodeId>,
    /// Wall time of the epoch.
    pub elapsed: Duration,
}

struct MaxNeighbor;

impl EdgeKernel for MaxNeighbor {
    type Partial = Option<NodeId>;

    #[inline]
    fn visit(&self, max: &mut Option<NodeId>, _: NodeId, record: VertexRecord<'_>) {
        if let Some(top) = record.neighbors().max() {
            *max = Some(max.map_or(top, |cur| cur.max(top)));
        }
    }
}

/// Runs a single epoch over `graph` without computing anything.
pub fn scan(graph: &Graph) -> Result<ScanReport> {
    let started = Instant::now();
    let mut cursors = LaneCursor::for_graph(graph)?;
    let outcome = run_epoch(graph, &mut cursors, &MaxNeighbor)?;
    let totals = outcome.totals();
    let max_neighbor = outcome.partials().flatten().copied().max();
    let elapsed = started.elapsed();
    info!(
        visited = totals.nodes,
        degree_sum = totals.edges,
        elapsed_ms = elapsed.as_millis() as u64,
        "scan finished"
    );
    Ok(ScanReport {
        n: graph.n(),
        m: graph.m(),
        blocks: totals.blocks,
        visited: totals.nodes,
        degree_sum: totals.edges,
        max_neighbor,
        elapsed,
    })
}
