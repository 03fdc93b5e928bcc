use super::{GraphFormatArg, PrecisionArg, PrefetchArg};
use clap::ValueEnum;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Settings read from `cli.toml`, validated.
#[derive(Debug, Default, Clone)]
pub struct CliConfig {
    pub path: Option<PathBuf>,
    pub lanes: Option<usize>,
    pub block_bytes: Option<usize>,
    pub prefetch: Option<PrefetchArg>,
    pub graph_format: Option<GraphFormatArg>,
    pub out_of_core_threshold: Option<u64>,
    pub scratch_dir: Option<PathBuf>,
    pub alpha: Option<f64>,
    pub tolerance: Option<f64>,
    pub precision: Option<PrecisionArg>,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        convert(path, data)
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn convert(path: Option<PathBuf>, raw: RawConfig) -> Result<CliConfig, ConfigError> {
    Ok(CliConfig {
        path,
        lanes: raw.graph.lanes,
        block_bytes: raw.graph.block_bytes,
        prefetch: parse_enum("graph.prefetch", raw.graph.prefetch.as_deref())?,
        graph_format: parse_enum("graph.format", raw.graph.format.as_deref())?,
        out_of_core_threshold: raw.vectors.out_of_core_threshold,
        scratch_dir: raw.vectors.scratch_dir,
        alpha: raw.pagerank.alpha,
        tolerance: raw.pagerank.tolerance,
        precision: parse_enum("pagerank.precision", raw.pagerank.precision.as_deref())?,
    })
}

fn parse_enum<T: ValueEnum>(key: &'static str, value: Option<&str>) -> Result<Option<T>, ConfigError> {
    match value {
        Some(value) => T::from_str(value, true)
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key,
                value: value.to_string(),
            }),
        None => Ok(None),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    graph: GraphSection,
    #[serde(default)]
    vectors: VectorsSection,
    #[serde(default)]
    pagerank: PageRankSection,
}

#[derive(Debug, Default, Deserialize)]
struct GraphSection {
    lanes: Option<usize>,
    block_bytes: Option<usize>,
    prefetch: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VectorsSection {
    out_of_core_threshold: Option<u64>,
    scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PageRankSection {
    alpha: Option<f64>,
    tolerance: Option<f64>,
    precision: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config value '{value}' for {key} is invalid")]
    InvalidValue { key: &'static str, value: String },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("blockgraph").join("cli.toml"))
}
