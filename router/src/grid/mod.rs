pub mod backend;
pub mod dense;
pub mod stencil;

pub use dense::DenseGrid;

use crate::utils::conversion::GridConverter;
use pcb_common::db::core::{Keepout, Pad, Segment, Via};
use pcb_common::db::indices::NetId;
use pcb_common::geom::coord::GridCoord;
use pcb_common::geom::point::Point;
use serde::Serialize;

/// What hard copper (or blockage) sits in a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum CellKind {
    #[default]
    Free,
    Pad,
    Trace,
    Via,
    Zone,
    Keepout,
    BoardEdge,
}

/// Snapshot of one cell. `owner` is `None` for free cells and for cells no
/// net may use (keepouts, board edge, copper of two different nets).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellState {
    pub kind: CellKind,
    pub owner: Option<NetId>,
    pub present: u16,
    pub history: f32,
}

pub trait RoutingGrid: Sync + Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn layers(&self) -> u8;
    fn converter(&self) -> &GridConverter;

    fn world_to_grid(&self, p: Point<f64>, layer: u8) -> GridCoord {
        self.converter().to_grid(p, layer)
    }
    fn grid_to_world(&self, c: GridCoord) -> Point<f64> {
        self.converter().to_world(c)
    }

    #[inline(always)]
    fn index(&self, c: GridCoord) -> usize {
        (c.z as usize) * (self.width() as usize) * (self.height() as usize)
            + (c.y as usize) * (self.width() as usize)
            + (c.x as usize)
    }

    #[inline(always)]
    fn coord(&self, idx: usize) -> GridCoord {
        let plane = (self.width() as usize) * (self.height() as usize);
        let z = idx / plane;
        let rem = idx % plane;
        GridCoord::new(
            (rem % self.width() as usize) as u32,
            (rem / self.width() as usize) as u32,
            z as u8,
        )
    }

    #[inline(always)]
    fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width() as i64 && y < self.height() as i64
    }

    fn cell(&self, c: GridCoord) -> CellState;

    /// Marks hard copper. A cell already held by another net becomes
    /// unusable for both rather than changing hands.
    fn add_pad(&mut self, pad: &Pad);
    fn add_via(&mut self, via: &Via);
    fn add_segment(&mut self, seg: &Segment);
    fn add_keepout(&mut self, keepout: &Keepout);

    /// True iff `c` or any cell of the clearance `halo` around it holds hard
    /// copper of a net other than `net`.
    fn is_blocked(&self, c: GridCoord, net: NetId, halo: &[(i32, i32)]) -> bool;

    /// [`is_blocked`](Self::is_blocked) on every layer at `(x, y)`.
    fn is_via_site_blocked(&self, x: u32, y: u32, net: NetId, halo: &[(i32, i32)]) -> bool {
        (0..self.layers()).any(|z| self.is_blocked(GridCoord::new(x, y, z), net, halo))
    }

    /// Adds one negotiation claim to each listed cell index.
    fn claim(&mut self, cells: &[u32]);
    fn release(&mut self, cells: &[u32]);

    /// Traversal cost: `1 + history + penalty * present`.
    fn get_cost(&self, c: GridCoord) -> f64;

    /// Highest cost in the square of Chebyshev radius `k` around `c`.
    fn footprint_cost(&self, c: GridCoord, k: u32) -> f64 {
        let (w, h) = (self.width() as i64, self.height() as i64);
        let k = k as i64;
        let mut best = 1.0f64;
        for y in (c.y as i64 - k).max(0)..=(c.y as i64 + k).min(h - 1) {
            for x in (c.x as i64 - k).max(0)..=(c.x as i64 + k).min(w - 1) {
                best = best.max(self.get_cost(GridCoord::new(x as u32, y as u32, c.z)));
            }
        }
        best
    }

    /// Appends the indices of the square of radius `k` around `c` on layer `c.z`.
    fn footprint_cells(&self, c: GridCoord, k: u32, out: &mut Vec<u32>) {
        let (w, h) = (self.width() as i64, self.height() as i64);
        let k = k as i64;
        for y in (c.y as i64 - k).max(0)..=(c.y as i64 + k).min(h - 1) {
            for x in (c.x as i64 - k).max(0)..=(c.x as i64 + k).min(w - 1) {
                out.push(self.index(GridCoord::new(x as u32, y as u32, c.z)) as u32);
            }
        }
    }

    /// `h <- min(h + increment * (present - 1), cap)` on every congested
    /// cell. Never lowers history. Returns the number of congested cells.
    fn update_history(&mut self, increment: f64, cap: f64) -> usize;
    fn total_history(&self) -> f64;

    fn is_congested(&self, c: GridCoord) -> bool;
    fn total_conflicts(&self) -> usize;

    fn set_penalty(&mut self, penalty: f64);
    fn penalty(&self) -> f64;
}
