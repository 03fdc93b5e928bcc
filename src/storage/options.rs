use serde::Serialize;

use super::format::GraphFormat;
use super::index::DEFAULT_BLOCK_BYTES;

/// Default number of worker lanes.
pub const DEFAULT_LANES: usize = 8;

/// How lanes obtain their next block.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchMode {
    /// One background reader per lane.
    #[default]
    PerLane,
    /// A single background reader serving every lane in request order.
    Shared,
    /// Blocks are read synchronously on the lane thread.
    Off,
}

/// Configuration options supplied when opening a [`super::Graph`].
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Number of lanes that iterate the graph in parallel.
    pub lanes: usize,
    /// Byte budget used to cut flat graphs into blocks at open.
    pub block_bytes: usize,
    /// Block prefetch strategy.
    pub prefetch: PrefetchMode,
    /// Forces a format instead of detecting it.
    pub format: Option<GraphFormat>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANES,
            block_bytes: DEFAULT_BLOCK_BYTES,
            prefetch: PrefetchMode::default(),
            format: None,
        }
    }
}

impl GraphOptions {
    /// Sets the lane count.
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }

    /// Sets the block budget for flat graphs.
    pub fn block_bytes(mut self, bytes: usize) -> Self {
        self.block_bytes = bytes;
        self
    }

    /// Selects the prefetch strategy.
    pub fn prefetch(mut self, mode: PrefetchMode) -> Self {
        self.prefetch = mode;
        self
    }

    /// Skips detection and opens the graph as `format`.
    pub fn format(mut self, format: GraphFormat) -> Self {
        self.format = Some(format);
        self
    }
}
