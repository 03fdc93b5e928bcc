use std::ops::{Add, Div, Mul};
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use super::{run_epoch, EdgeKernel, IterationStats, Progress};
use crate::storage::vector::{Element, FloatElement};
use crate::storage::{Graph, LaneCursor, NumericVector, VectorBacking, VectorOptions, VertexRecord};
use crate::types::{GraphError, NodeId, Result};

/// Node count above which PageRank vectors are memory-mapped.
pub const PAGERANK_OUT_OF_CORE_THRESHOLD: u64 = 67_108_864;

/// Element type of the rank vectors.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// `f32`.
    #[default]
    F32,
    /// `f64`.
    F64,
}

/// PageRank parameters.
#[derive(Clone, Debug)]
pub struct PageRankOptions {
    /// Damping factor.
    pub alpha: f64,
    /// Stop once the L1 residual drops below this.
    pub tolerance: f64,
    /// Iteration budget.
    pub max_iterations: usize,
    /// Vector backing selection.
    pub vectors: VectorOptions,
}

impl Default for PageRankOptions {
    fn default() -> Self {
        Self {
            alpha: 0.85,
            tolerance: 1e-8,
            max_iterations: 100,
            vectors: VectorOptions::default().out_of_core_threshold(PAGERANK_OUT_OF_CORE_THRESHOLD),
        }
    }
}

impl PageRankOptions {
    /// Sets the damping factor.
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the residual tolerance.
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

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

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(GraphError::InvalidArgument(format!(
                "alpha must lie in [0, 1], got {}",
                self.alpha
            )));
        }
        if !(self.tolerance >= 0.0) {
            return Err(GraphError::InvalidArgument(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Summary of a PageRank run.
#[derive(Clone, Debug, Serialize)]
pub struct PageRankReport {
    /// Node count.
    pub n: u64,
    /// Edge count.
    pub m: u64,
    /// Iterations performed.
    pub iterations: usize,
    /// Residual after each iteration.
    pub residuals: Vec<f64>,
    /// Whether the residual dropped below the tolerance.
    pub converged: bool,
    /// Element type used.
    pub precision: Precision,
    /// Backing of the rank vectors.
    pub backing: VectorBacking,
    /// File the ranks were written to.
    pub output: Option<PathBuf>,
}

/// Ranks and report of a finished run.
#[derive(Debug)]
pub struct PageRankRun<E: Element> {
    /// Final rank vector.
    pub ranks: NumericVector<E>,
    /// Run summary.
    pub report: PageRankReport,
}

/// Element types PageRank can run in.
pub trait RankElement:
    FloatElement + Add<Output = Self> + Mul<Output = Self> + Div<Output = Self>
{
    /// Tag stored in the report.
    const PRECISION: Precision;
}

impl RankElement for f32 {
    const PRECISION: Precision = Precision::F32;
}

impl RankElement for f64 {
    const PRECISION: Precision = Precision::F64;
}

struct RankScatter<'v, E: Element> {
    x: &'v [E::Atomic],
    y: &'v [E::Atomic],
    alpha: E,
}

impl<E: RankElement> EdgeKernel for RankScatter<'_, E> {
    type Partial = ();

    #[inline]
    fn visit(&self, _: &mut (), id: NodeId, record: VertexRecord<'_>) {
        let degree = record.degree();
        if degree == 0 {
            return;
        }
        let update = self.alpha * E::load(&self.x[id as usize]) / E::from_f64(degree as f64);
        for dst in record.neighbors() {
            E::atomic_add(&self.y[dst as usize], update);
        }
    }
}

/// Runs power iteration on `graph`.
///
/// Each epoch scatters `alpha * x[i] / deg(i)` along every out-edge, then adds
/// `(1 - sum(y)) / n` to every entry. That single pooled term covers both the
/// teleport mass and the mass of nodes without out-edges.
pub fn pagerank<E: RankElement>(
    graph: &Graph,
    options: &PageRankOptions,
    observer: &mut dyn FnMut(&IterationStats),
) -> Result<PageRankRun<E>> {
    options.validate()?;
    let n = usize::try_from(graph.n()).map_err(|_| GraphError::FormatLimitExceeded {
        what: "node count",
        value: graph.n(),
        limit: usize::MAX as u64,
    })?;
    let mut x = NumericVector::<E>::new(n, &options.vectors)?;
    let mut y = NumericVector::<E>::new(n, &options.vectors)?;
    x.fill(E::from_f64(1.0 / n as f64));

    let mut cursors = LaneCursor::for_graph(graph)?;
    let alpha = E::from_f64(options.alpha);
    let mut residuals = Vec::new();
    let mut converged = false;
    for iteration in 1..=options.max_iterations {
        let started = Instant::now();
        y.fill(E::default());
        let kernel = RankScatter {
            x: x.slots(),
            y: y.slots(),
            alpha,
        };
        let outcome = run_epoch(graph, &mut cursors, &kernel)?;

        let mass: f64 = y.cursor().map(|v| -> f64 { v.into() }).sum();
        let remainder = E::from_f64((1.0 - mass) / n as f64);
        let mut residual = 0.0f64;
        for (xs, ys) in x.slots().iter().zip(y.slots()) {
            let next = E::load(ys) + remainder;
            E::store(ys, next);
            let prev: f64 = E::load(xs).into();
            let next_f: f64 = next.into();
            residual += (prev - next_f).abs();
        }
        std::mem::swap(&mut x, &mut y);

        let totals = outcome.totals();
        let stats = IterationStats {
            iteration,
            progress: Progress::Residual(residual),
            nodes: totals.nodes,
            edges: totals.edges,
            elapsed: started.elapsed(),
        };
        info!(iteration, residual, elapsed_ms = stats.elapsed.as_millis() as u64, "pagerank iteration");
        observer(&stats);
        residuals.push(residual);
        if residual < options.tolerance {
            converged = true;
            break;
        }
    }

    let report = PageRankReport {
        n: graph.n(),
        m: graph.m(),
        iterations: residuals.len(),
        residuals,
        converged,
        precision: E::PRECISION,
        backing: x.backing(),
        output: None,
    };
    Ok(PageRankRun { ranks: x, report })
}
