use crate::algo::GuideOracle;
use pcb_common::geom::coord::{CellBox, GridCoord};

/// Centre-to-centre spacing, in cells, that keeps a coupled trace at the
/// pair gap without its claim overlapping the partner's.
pub fn coupling_spacing(gap: f64, trace_width: f64, resolution: f64, claim: u32) -> u32 {
    let wanted = ((gap + trace_width) / resolution - 1e-9).ceil().max(0.0) as u32;
    wanted.max(2 * claim + 1)
}

/// Guides the second net of a pair along a band at fixed spacing from the
/// first net's path. Cells near the net's own terminals are always inside
/// the guide so the route can leave and enter its pads.
pub struct CouplingGuide {
    bounds: CellBox,
    width: u32,
    /// Chebyshev distance to the partner path, saturated past the band.
    dist: Vec<u16>,
    spacing: u16,
    terminals: Vec<GridCoord>,
}

impl CouplingGuide {
    pub fn new(partner: &[GridCoord], bounds: CellBox, spacing: u32, terminals: &[GridCoord]) -> Self {
        let width = bounds.width();
        let spacing = spacing.min(u16::MAX as u32 - 2) as u16;
        let reach = spacing as i64 + 1;
        let mut dist = vec![u16::MAX; width as usize * bounds.height() as usize];
        for p in partner {
            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    let x = p.x as i64 + dx;
                    let y = p.y as i64 + dy;
                    if x < bounds.min_x as i64
                        || y < bounds.min_y as i64
                        || x > bounds.max_x as i64
                        || y > bounds.max_y as i64
                    {
                        continue;
                    }
                    let i = (y as u32 - bounds.min_y) as usize * width as usize
                        + (x as u32 - bounds.min_x) as usize;
                    let d = dx.abs().max(dy.abs()) as u16;
                    dist[i] = dist[i].min(d);
                }
            }
        }
        Self {
            bounds,
            width,
            dist,
            spacing,
            terminals: terminals.to_vec(),
        }
    }
}

impl GuideOracle for CouplingGuide {
    fn is_in_guide(&self, c: GridCoord) -> bool {
        let near_terminal = self
            .terminals
            .iter()
            .any(|t| t.chebyshev(&c) <= self.spacing as u32 + 1);
        if near_terminal {
            return true;
        }
        if !self.bounds.contains(c.x, c.y) {
            return false;
        }
        let i = (c.y - self.bounds.min_y) as usize * self.width as usize
            + (c.x - self.bounds.min_x) as usize;
        let d = self.dist[i];
        d == self.spacing || d == self.spacing + 1
    }
}
