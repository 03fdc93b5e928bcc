//! Binary entry point for the blockgraph CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use blockgraph::{
    cli::commands::{
        run_components, run_index, run_inspect, run_pagerank, run_partition, run_scan,
        ComponentsConfig, IndexConfig, InspectReport, OpenConfig, PageRankConfig, RunObserver,
        VectorConfig,
    },
    logging::init_logging,
    program::{ComponentsReport, IterationStats, PageRankReport, Precision, ScanReport},
    storage::{
        index::DEFAULT_BLOCK_BYTES, BuildSummary, GraphFormat, GraphHeader, GraphOptions,
        PrefetchMode, DEFAULT_LANES,
    },
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;

#[path = "cli/config.rs"]
mod config;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(
    name = "blockgraph",
    version,
    about = "Out-of-core graph analytics over block-partitioned adjacency files",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "BLOCKGRAPH_CONFIG",
        value_name = "FILE",
        help = "CLI config file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "RUST_LOG",
        default_value = "warn",
        help = "Log filter directive"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, help = "Number of worker lanes")]
    lanes: Option<usize>,

    #[arg(long, global = true, help = "Block byte budget")]
    block_bytes: Option<usize>,

    #[arg(long, global = true, value_enum, help = "Block prefetch mode")]
    prefetch: Option<PrefetchArg>,

    #[arg(long, global = true, value_enum, help = "Input graph format")]
    graph_format: Option<GraphFormatArg>,

    #[arg(
        long = "ooc-threshold",
        global = true,
        value_name = "NODES",
        help = "Node count above which vectors are memory-mapped"
    )]
    out_of_core_threshold: Option<u64>,

    #[arg(long, global = true, value_name = "DIR", help = "Directory for mapped vectors")]
    scratch_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Write an indexed single-file graph from a flat graph")]
    Index {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },

    #[command(about = "Split a flat graph into a directory of block shards")]
    Partition {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(value_name = "OUTDIR")]
        output: PathBuf,
    },

    #[command(about = "Run PageRank")]
    Pagerank {
        #[arg(value_name = "GRAPH")]
        graph: PathBuf,
        #[arg(value_name = "MAX_ITER")]
        max_iterations: usize,
        #[arg(value_name = "OUTPUT", help = "Write the final ranks here")]
        output: Option<PathBuf>,
        #[arg(long, help = "Damping factor")]
        alpha: Option<f64>,
        #[arg(long = "tol", help = "Residual tolerance")]
        tolerance: Option<f64>,
        #[arg(long, value_enum, help = "Rank element type")]
        precision: Option<PrecisionArg>,
    },

    #[command(about = "Label nodes by connected component")]
    Components {
        #[arg(value_name = "GRAPH")]
        graph: PathBuf,
        #[arg(value_name = "MAX_ITER")]
        max_iterations: usize,
        #[arg(value_name = "OUTPUT", help = "Write the final labels here")]
        output: Option<PathBuf>,
    },

    #[command(about = "Traverse every block once")]
    Scan {
        #[arg(value_name = "GRAPH")]
        graph: PathBuf,
    },

    #[command(about = "Show the block layout of a graph")]
    Inspect {
        #[arg(value_name = "GRAPH")]
        graph: PathBuf,
        #[arg(long, help = "Check every record against the header")]
        verify: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum PrefetchArg {
    PerLane,
    Shared,
    Off,
}

impl From<PrefetchArg> for PrefetchMode {
    fn from(mode: PrefetchArg) -> Self {
        match mode {
            PrefetchArg::PerLane => PrefetchMode::PerLane,
            PrefetchArg::Shared => PrefetchMode::Shared,
            PrefetchArg::Off => PrefetchMode::Off,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum GraphFormatArg {
    Auto,
    Flat,
    Indexed,
    Sharded,
}

impl GraphFormatArg {
    fn resolve(self) -> Option<GraphFormat> {
        match self {
            GraphFormatArg::Auto => None,
            GraphFormatArg::Flat => Some(GraphFormat::Flat),
            GraphFormatArg::Indexed => Some(GraphFormat::IndexedSingleFile),
            GraphFormatArg::Sharded => Some(GraphFormat::IndexedSharded),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum PrecisionArg {
    F32,
    F64,
}

impl From<PrecisionArg> for Precision {
    fn from(precision: PrecisionArg) -> Self {
        match precision {
            PrecisionArg::F32 => Precision::F32,
            PrecisionArg::F64 => Precision::F64,
        }
    }
}

/// Progress lines on stderr, leaving stdout for the report.
struct StderrProgress;

impl RunObserver for StderrProgress {
    fn opened(&mut self, header: GraphHeader) {
        eprintln!("Nodes: {}", header.n);
        eprintln!("Edges: {}", header.m);
    }

    fn iteration(&mut self, stats: &IterationStats) {
        eprintln!("{stats}");
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let config = CliConfig::load(cli.config.clone())?;
    debug!(path = ?config.path, "cli config loaded");
    let settings = Settings::layer(&cli.open, &config);

    match cli.command {
        Command::Index { input, output } => {
            let summary = run_index(&IndexConfig {
                input,
                output,
                block_bytes: settings.graph.block_bytes,
            })?;
            emit(&cli.format, &summary, |_| print_build_text("Indexed", &summary))?;
        }
        Command::Partition { input, output } => {
            let summary = run_partition(&IndexConfig {
                input,
                output,
                block_bytes: settings.graph.block_bytes,
            })?;
            emit(&cli.format, &summary, |_| print_build_text("Partitioned", &summary))?;
        }
        Command::Pagerank {
            graph,
            max_iterations,
            output,
            alpha,
            tolerance,
            precision,
        } => {
            let mut cfg = PageRankConfig::new(graph, max_iterations);
            cfg.open.graph = settings.graph.clone();
            cfg.vectors = settings.vectors.clone();
            cfg.output = output;
            if let Some(alpha) = alpha.or(config.alpha) {
                cfg.alpha = alpha;
            }
            if let Some(tolerance) = tolerance.or(config.tolerance) {
                cfg.tolerance = tolerance;
            }
            if let Some(precision) = precision.or(config.precision) {
                cfg.precision = precision.into();
            }
            let report = run_pagerank(&cfg, &mut StderrProgress)?;
            emit(&cli.format, &report, |_| print_pagerank_text(&report))?;
        }
        Command::Components {
            graph,
            max_iterations,
            output,
        } => {
            let cfg = ComponentsConfig {
                open: settings.open(graph),
                max_iterations,
                vectors: settings.vectors.clone(),
                output,
            };
            let report = run_components(&cfg, &mut StderrProgress)?;
            emit(&cli.format, &report, |_| print_components_text(&report))?;
        }
        Command::Scan { graph } => {
            let report = run_scan(&settings.open(graph), &mut StderrProgress)?;
            emit(&cli.format, &report, |_| print_scan_text(&report))?;
        }
        Command::Inspect { graph, verify } => {
            let report = run_inspect(&settings.open(graph), verify)?;
            emit(&cli.format, &report, |_| print_inspect_text(&report))?;
        }
    }

    Ok(())
}

/// Built-in defaults, overridden by the config file, overridden by flags.
struct Settings {
    graph: GraphOptions,
    vectors: VectorConfig,
}

impl Settings {
    fn layer(args: &OpenArgs, config: &CliConfig) -> Self {
        let mut graph = GraphOptions::default()
            .lanes(args.lanes.or(config.lanes).unwrap_or(DEFAULT_LANES))
            .block_bytes(
                args.block_bytes
                    .or(config.block_bytes)
                    .unwrap_or(DEFAULT_BLOCK_BYTES),
            );
        if let Some(mode) = args.prefetch.or(config.prefetch) {
            graph = graph.prefetch(mode.into());
        }
        if let Some(format) = args
            .graph_format
            .or(config.graph_format)
            .and_then(GraphFormatArg::resolve)
        {
            graph = graph.format(format);
        }
        let vectors = VectorConfig {
            out_of_core_threshold: args.out_of_core_threshold.or(config.out_of_core_threshold),
            scratch_dir: args
                .scratch_dir
                .clone()
                .or_else(|| config.scratch_dir.clone()),
        };
        Self { graph, vectors }
    }

    fn open(&self, graph_path: PathBuf) -> OpenConfig {
        OpenConfig {
            graph_path,
            graph: self.graph.clone(),
        }
    }
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_build_text(verb: &str, summary: &BuildSummary) {
    println!(
        "{verb} {} nodes and {} edges into {} blocks at {} (block budget {} bytes)",
        summary.n,
        summary.m,
        summary.blocks,
        summary.output.display(),
        summary.block_bytes
    );
}

fn print_pagerank_text(report: &PageRankReport) {
    let last = report.residuals.last().copied().unwrap_or(0.0);
    println!(
        "PageRank ({:?}, {:?} vectors): iterations={} converged={} residual={last:.6e}",
        report.precision, report.backing, report.iterations, report.converged
    );
    if let Some(path) = &report.output {
        println!("Ranks written to {}", path.display());
    }
}

fn print_components_text(report: &ComponentsReport) {
    println!(
        "Components ({:?} vectors): iterations={} converged={} components={}",
        report.backing, report.iterations, report.converged, report.components
    );
    if let Some(path) = &report.output {
        println!("Labels written to {}", path.display());
    }
}

fn print_scan_text(report: &ScanReport) {
    let max = report
        .max_neighbor
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "Scanned {} blocks: visited={} degree_sum={} max_neighbor={max} in {:.2} ms",
        report.blocks,
        report.visited,
        report.degree_sum,
        report.elapsed.as_secs_f64() * 1000.0
    );
}

fn print_inspect_text(report: &InspectReport) {
    println!(
        "{} ({:?}): n={} m={} lanes={} blocks={}",
        report.path.display(),
        report.format,
        report.n,
        report.m,
        report.lanes,
        report.blocks.len()
    );
    for block in &report.blocks {
        println!(
            "  block {:>4} lane {:>2}: first_node={} nodes={} bytes={}",
            block.block_no, block.lane, block.first_node, block.nodes, block.bytes
        );
    }
    if let Some(verify) = &report.verify {
        println!(
            "Verify => nodes_seen={} edges_seen={}",
            verify.nodes_seen, verify.edges_seen
        );
    }
}
