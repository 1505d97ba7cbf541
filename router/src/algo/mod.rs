pub mod astar;
pub mod bidirectional;
pub mod cost;
pub mod window;

pub use astar::{AStar, GuideOracle, NoGuide};
pub use cost::{ClearanceModel, CostModel, NeckDown};

use pcb_common::db::indices::NetId;
use pcb_common::geom::coord::{CellBox, GridCoord};
use pcb_common::util::config::BidirectionalConfig;
use serde::Serialize;
use thiserror::Error;

/// One point-to-tree connection for the pathfinder.
pub struct SearchRequest<'a> {
    pub net: NetId,
    /// Cells already connected; any of them may start the path.
    pub starts: &'a [GridCoord],
    pub end: GridCoord,
    /// The target is reachable on every layer (through-hole terminal).
    pub end_any_layer: bool,
    pub costs: &'a CostModel,
    pub clearance: &'a ClearanceModel,
    pub oracle: &'a dyn GuideOracle,
    /// Added for every step onto a cell outside the oracle's guide.
    pub guide_penalty: u64,
    pub allow_vias: bool,
    /// Sorted `(x, y)` sites where this net may not drop a via.
    pub forbidden_vias: &'a [(u32, u32)],
    pub window: CellBox,
    pub max_expansions: usize,
}

impl SearchRequest<'_> {
    #[inline(always)]
    pub fn is_goal(&self, c: GridCoord) -> bool {
        c.x == self.end.x && c.y == self.end.y && (self.end_any_layer || c.z == self.end.z)
    }

    #[inline]
    pub fn via_forbidden(&self, x: u32, y: u32) -> bool {
        self.forbidden_vias.binary_search(&(x, y)).is_ok()
    }

    /// Shortest planar distance in cells from any start to the target.
    pub fn span(&self) -> f64 {
        self.starts
            .iter()
            .map(|s| s.planar_distance(&self.end))
            .fold(f64::INFINITY, f64::min)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchPath {
    /// Start cell first, target cell last.
    pub cells: Vec<GridCoord>,
    pub cost: u64,
    pub expansions: usize,
}

impl SearchPath {
    pub fn via_count(&self) -> usize {
        self.cells.windows(2).filter(|w| w[0].z != w[1].z).count()
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize)]
pub enum SearchFailure {
    #[error("no path between the terminals under the current obstacles")]
    Unreachable,
    #[error("node expansion budget exhausted")]
    ExpansionBudget,
    /// Nothing found inside a window smaller than the grid; a wider window
    /// may still succeed.
    #[error("no path inside the search window")]
    OutsideWindow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SearchMode {
    Unidirectional,
    Bidirectional,
}

/// Bidirectional only pays off on long connections.
pub fn select_mode(req: &SearchRequest<'_>, cfg: &BidirectionalConfig) -> SearchMode {
    if cfg.enabled && req.span() > cfg.node_threshold as f64 {
        SearchMode::Bidirectional
    } else {
        SearchMode::Unidirectional
    }
}
