use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use super::{run_epoch, EdgeKernel, IterationStats, Progress};
use crate::storage::{Graph, LaneCursor, NumericVector, VectorBacking, VectorOptions, VertexRecord};
use crate::types::{GraphError, NodeId, Result};

/// Node count above which label vectors are memory-mapped.
pub const COMPONENTS_OUT_OF_CORE_THRESHOLD: u64 = 134_217_728;

/// Label propagation parameters.
#[derive(Clone, Debug)]
pub struct ComponentsOptions {
    /// Iteration budget.
    pub max_iterations: usize,
    /// Vector backing selection.
    pub vectors: VectorOptions,
}

impl Default for ComponentsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            vectors: VectorOptions::default()
                .out_of_core_threshold(COMPONENTS_OUT_OF_CORE_THRESHOLD),
        }
    }
}

impl ComponentsOptions {
    /// Sets the iteration budget.
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Sets the vector options.
    pub fn vectors(mut self, vectors: VectorOptions) -> Self {
        self.vectors = vectors;
        self
    }
}

/// Summary of a label propagation run.
#[derive(Clone, Debug, Serialize)]
pub struct ComponentsReport {
    /// Node count.
    pub n: u64,
    /// Edge count.
    pub m: u64,
    /// Iterations performed.
    pub iterations: usize,
    /// Labels lowered in each iteration.
    pub propagations: Vec<u64>,
    /// Whether an iteration finished without lowering any label.
    pub converged: bool,
    /// Nodes that kept their own id as label.
    pub components: u64,
    /// Backing of the label vector.
    pub backing: VectorBacking,
    /// File the labels were written to.
    pub output: Option<PathBuf>,
}

/// Labels and report of a finished run.
#[derive(Debug)]
pub struct ComponentsRun {
    /// Final label of every node.
    pub labels: NumericVector<u32>,
    /// Run summary.
    pub report: ComponentsReport,
}

struct MinLabel<'v> {
    labels: &'v [AtomicU32],
}

impl EdgeKernel for MinLabel<'_> {
    type Partial = u64;

    #[inline]
    fn visit(&self, changed: &mut u64, id: NodeId, record: VertexRecord<'_>) {
        let src = &self.labels[id as usize];
        for dst in record.neighbors() {
            let dst = &self.labels[dst as usize];
            let lo = src.load(Ordering::Relaxed).min(dst.load(Ordering::Relaxed));
            if src.fetch_min(lo, Ordering::Relaxed) > lo {
                *changed += 1;
            }
            if dst.fetch_min(lo, Ordering::Relaxed) > lo {
                *changed += 1;
            }
        }
    }
}

/// Labels every node with the smallest id reachable over edges in either
/// direction.
///
/// Both endpoints of an edge are lowered to their common minimum, so a
/// directed edge spreads labels both ways and the fixpoint is the weakly
/// connected components of the graph.
pub fn components(
    graph: &Graph,
    options: &ComponentsOptions,
    observer: &mut dyn FnMut(&IterationStats),
) -> Result<ComponentsRun> {
    let n = usize::try_from(graph.n()).map_err(|_| GraphError::FormatLimitExceeded {
        what: "node count",
        value: graph.n(),
        limit: usize::MAX as u64,
    })?;
    let labels = NumericVector::<u32>::new(n, &options.vectors)?;
    for (i, slot) in labels.slots().iter().enumerate() {
        slot.store(i as u32, Ordering::Relaxed);
    }

    let mut cursors = LaneCursor::for_graph(graph)?;
    let kernel = MinLabel {
        labels: labels.slots(),
    };
    let mut propagations = Vec::new();
    let mut converged = false;
    for iteration in 1..=options.max_iterations {
        let started = Instant::now();
        let outcome = run_epoch(graph, &mut cursors, &kernel)?;
        let changed: u64 = outcome.partials().sum();
        let totals = outcome.totals();
        let stats = IterationStats {
            iteration,
            progress: Progress::Propagations(changed),
            nodes: totals.nodes,
            edges: totals.edges,
            elapsed: started.elapsed(),
        };
        info!(iteration, changed, elapsed_ms = stats.elapsed.as_millis() as u64, "label propagation iteration");
        observer(&stats);
        propagations.push(changed);
        if changed == 0 {
            converged = true;
            break;
        }
    }

    let components = labels
        .cursor()
        .enumerate()
        .filter(|&(i, label)| label as usize == i)
        .count() as u64;
    let report = ComponentsReport {
        n: graph.n(),
        m: graph.m(),
        iterations: propagations.len(),
        propagations,
        converged,
        components,
        backing: labels.backing(),
        output: None,
    };
    Ok(ComponentsRun { labels, report })
}
