use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::program::pagerank::RankElement;
use crate::program::{
    components, pagerank, scan, ComponentsOptions, ComponentsReport, IterationStats,
    PageRankOptions, PageRankReport, Precision, ScanReport,
};
use crate::storage::{
    build_index, partition, BuildSummary, Graph, GraphFormat, GraphHeader, GraphOptions,
    VectorOptions, VerifyReport,
};
use crate::types::{BlockNo, GraphError, NodeId};

/// Error type for CLI command runners.
#[derive(Error, Debug)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// IO error from file operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Storage or program error.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        CliError::Message(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}

/// Receives progress from long-running commands.
pub trait RunObserver {
    /// Called once the graph header is known.
    fn opened(&mut self, _header: GraphHeader) {}
    /// Called after every iteration.
    fn iteration(&mut self, _stats: &IterationStats) {}
}

/// Observer that discards everything.
#[derive(Debug, Default)]
pub struct Silent;

impl RunObserver for Silent {}

/// Configuration for converting a flat graph.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Flat input graph.
    pub input: PathBuf,
    /// Output file (`index`) or directory (`partition`).
    pub output: PathBuf,
    /// Block byte budget.
    pub block_bytes: usize,
}

/// Writes an indexed single-file graph.
pub fn run_index(cfg: &IndexConfig) -> Result<BuildSummary, CliError> {
    Ok(build_index(&cfg.input, &cfg.output, cfg.block_bytes)?)
}

/// Writes a sharded graph directory.
pub fn run_partition(cfg: &IndexConfig) -> Result<BuildSummary, CliError> {
    Ok(partition(&cfg.input, &cfg.output, cfg.block_bytes)?)
}

/// Settings shared by every command that opens a graph.
#[derive(Debug, Clone, Default)]
pub struct OpenConfig {
    /// Graph file or sharded directory.
    pub graph_path: PathBuf,
    /// Lane, block and prefetch settings.
    pub graph: GraphOptions,
}

impl OpenConfig {
    fn open(&self, observer: &mut dyn RunObserver) -> Result<Graph, CliError> {
        let graph = Graph::open(&self.graph_path, self.graph.clone())?;
        observer.opened(graph.header());
        Ok(graph)
    }
}

/// Vector placement shared by the analytics commands.
#[derive(Debug, Clone, Default)]
pub struct VectorConfig {
    /// Overrides the program's default out-of-core threshold.
    pub out_of_core_threshold: Option<u64>,
    /// Directory for mapped vector files.
    pub scratch_dir: Option<PathBuf>,
}

impl VectorConfig {
    fn apply(&self, mut base: VectorOptions) -> VectorOptions {
        if let Some(threshold) = self.out_of_core_threshold {
            base = base.out_of_core_threshold(threshold);
        }
        if let Some(dir) = &self.scratch_dir {
            base = base.scratch_dir(dir);
        }
        base
    }
}

/// Configuration for a PageRank run.
#[derive(Debug, Clone)]
pub struct PageRankConfig {
    /// Graph to open.
    pub open: OpenConfig,
    /// Iteration budget.
    pub max_iterations: usize,
    /// Damping factor.
    pub alpha: f64,
    /// Residual tolerance.
    pub tolerance: f64,
    /// Element type.
    pub precision: Precision,
    /// Vector placement.
    pub vectors: VectorConfig,
    /// Where to write the final ranks.
    pub output: Option<PathBuf>,
}

impl PageRankConfig {
    /// Defaults for `graph_path` running at most `max_iterations` iterations.
    pub fn new(graph_path: impl Into<PathBuf>, max_iterations: usize) -> Self {
        let defaults = PageRankOptions::default();
        Self {
            open: OpenConfig {
                graph_path: graph_path.into(),
                graph: GraphOptions::default(),
            },
            max_iterations,
            alpha: defaults.alpha,
            tolerance: defaults.tolerance,
            precision: Precision::default(),
            vectors: VectorConfig::default(),
            output: None,
        }
    }
}

/// Runs PageRank and optionally writes the ranks.
pub fn run_pagerank(
    cfg: &PageRankConfig,
    observer: &mut dyn RunObserver,
) -> Result<PageRankReport, CliError> {
    let graph = cfg.open.open(observer)?;
    let defaults = PageRankOptions::default();
    let options = PageRankOptions::default()
        .alpha(cfg.alpha)
        .tolerance(cfg.tolerance)
        .max_iterations(cfg.max_iterations)
        .vectors(cfg.vectors.apply(defaults.vectors));
    match cfg.precision {
        Precision::F32 => pagerank_as::<f32>(&graph, &options, cfg.output.as_deref(), observer),
        Precision::F64 => pagerank_as::<f64>(&graph, &options, cfg.output.as_deref(), observer),
    }
}

fn pagerank_as<E: RankElement>(
    graph: &Graph,
    options: &PageRankOptions,
    output: Option<&Path>,
    observer: &mut dyn RunObserver,
) -> Result<PageRankReport, CliError> {
    let run = pagerank::<E>(graph, options, &mut |stats: &IterationStats| observer.iteration(stats))?;
    let mut report = run.report;
    if let Some(path) = output {
        run.ranks.persist(path)?;
        report.output = Some(path.to_path_buf());
    }
    Ok(report)
}

/// Configuration for a label propagation run.
#[derive(Debug, Clone)]
pub struct ComponentsConfig {
    /// Graph to open.
    pub open: OpenConfig,
    /// Iteration budget.
    pub max_iterations: usize,
    /// Vector placement.
    pub vectors: VectorConfig,
    /// Where to write the final labels.
    pub output: Option<PathBuf>,
}

/// Runs label propagation and optionally writes the labels.
pub fn run_components(
    cfg: &ComponentsConfig,
    observer: &mut dyn RunObserver,
) -> Result<ComponentsReport, CliError> {
    let graph = cfg.open.open(observer)?;
    let defaults = ComponentsOptions::default();
    let options = ComponentsOptions::default()
        .max_iterations(cfg.max_iterations)
        .vectors(cfg.vectors.apply(defaults.vectors));
    let run = components(&graph, &options, &mut |stats: &IterationStats| observer.iteration(stats))?;
    let mut report = run.report;
    if let Some(path) = &cfg.output {
        run.labels.persist(path)?;
        report.output = Some(path.clone());
    }
    Ok(report)
}

/// Runs one traversal epoch.
pub fn run_scan(cfg: &OpenConfig, observer: &mut dyn RunObserver) -> Result<ScanReport, CliError> {
    let graph = cfg.open(observer)?;
    Ok(scan(&graph)?)
}

/// One block in an [`InspectReport`].
#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    /// One-based block number.
    pub block_no: BlockNo,
    /// Lane that owns the block.
    pub lane: usize,
    /// First node id.
    pub first_node: NodeId,
    /// Node count.
    pub nodes: u64,
    /// Byte length.
    pub bytes: u64,
}

/// Layout of an opened graph.
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    /// Graph path.
    pub path: PathBuf,
    /// Detected or forced format.
    pub format: GraphFormat,
    /// Node count.
    pub n: u64,
    /// Edge count.
    pub m: u64,
    /// Lane count.
    pub lanes: usize,
    /// Every block in order.
    pub blocks: Vec<BlockSummary>,
    /// Full consistency check, when requested.
    pub verify: Option<VerifyReport>,
}

/// Describes the blocks of a graph, optionally verifying every record.
pub fn run_inspect(cfg: &OpenConfig, verify: bool) -> Result<InspectReport, CliError> {
    let graph = cfg.open(&mut Silent)?;
    let mut blocks = Vec::with_capacity(graph.block_count() as usize);
    for entry in graph.index().entries() {
        let (first, end) = graph.block_span(entry.block_no)?;
        blocks.push(BlockSummary {
            block_no: entry.block_no,
            lane: graph.lane_of(entry.block_no),
            first_node: entry.first_node,
            nodes: end - first,
            bytes: entry.len,
        });
    }
    let verify = if verify { Some(graph.verify()?) } else { None };
    Ok(InspectReport {
        path: graph.path().to_path_buf(),
        format: graph.format(),
        n: graph.n(),
        m: graph.m(),
        lanes: graph.lanes(),
        blocks,
        verify,
    })
}
