use crate::grid::RoutingGrid;
use crate::grid::stencil::{claim_radius, disc, halo_radius};
use crate::utils::conversion::GridConverter;
use pcb_common::db::core::BoardDB;
use pcb_common::db::indices::NetId;
use pcb_common::geom::coord::GridCoord;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::util::config::{CostWeights, DesignRules};

/// Fixed-point scale of all search costs.
pub const COST_SCALE: f64 = 1000.0;

/// Integer edge costs derived from the rule weights.
#[derive(Clone, Debug)]
pub struct CostModel {
    pub ortho: u64,
    pub diag: u64,
    pub via: u64,
    pub turn: u64,
    pub congestion: f64,
    /// Lower bound of cost per cell of planar travel, one unit below the
    /// true minimum so integer rounding keeps the heuristic consistent.
    h_unit: f64,
}

impl CostModel {
    pub fn new(w: &CostWeights) -> Self {
        let ortho = ((w.straight * COST_SCALE).round() as u64).max(1);
        let diag = ((w.diagonal * COST_SCALE * std::f64::consts::SQRT_2).round() as u64).max(1);
        let h_unit = ((ortho as f64).min(diag as f64 / std::f64::consts::SQRT_2) - 1.0).max(0.0);
        Self {
            ortho,
            diag,
            via: (w.via * COST_SCALE).round() as u64,
            turn: (w.turn * COST_SCALE).round() as u64,
            congestion: w.congestion,
            h_unit,
        }
    }

    /// Extra cost of a cell whose grid cost is `cost` (1 when idle).
    #[inline(always)]
    pub fn extra(&self, cost: f64) -> u64 {
        ((cost - 1.0).max(0.0) * self.congestion * COST_SCALE) as u64
    }

    /// Straight-line lower bound from `a` to the cell `end`.
    #[inline(always)]
    pub fn heuristic(&self, a: GridCoord, end: GridCoord, any_layer: bool) -> u64 {
        let dist = a.planar_distance(&end);
        let via = if !any_layer && a.z != end.z { self.via } else { 0 };
        (dist * self.h_unit) as u64 + via
    }

    /// Straight-line lower bound from `a` to the nearest point of a box.
    #[inline(always)]
    pub fn heuristic_to_box(&self, a: GridCoord, target: &pcb_common::geom::coord::CellBox, layer_ok: bool) -> u64 {
        let dist = target.distance_to(a.x, a.y);
        let via = if layer_ok { 0 } else { self.via };
        (dist * self.h_unit) as u64 + via
    }
}

/// Narrows traces near fine-pitch terminals of one net.
#[derive(Clone, Debug)]
pub struct NeckDown {
    pub pads: Vec<Rect>,
    pub min_width: f64,
    pub nominal: f64,
    pub taper: f64,
}

impl NeckDown {
    /// `None` unless the net has a terminal whose pitch is below threshold.
    pub fn for_net(db: &BoardDB, net: NetId, rules: &DesignRules) -> Option<Self> {
        let nd = &rules.neck_down;
        if !nd.enabled {
            return None;
        }
        let pads: Vec<Rect> = db.nets[net.index()]
            .pads
            .iter()
            .filter(|&&p| db.pad_pitch(p).is_some_and(|pitch| pitch < nd.pitch_threshold))
            .map(|&p| db.pads[p.index()].rect())
            .collect();
        (!pads.is_empty()).then(|| Self {
            pads,
            min_width: nd.min_width.min(rules.trace_width),
            nominal: rules.trace_width,
            taper: nd.taper_distance,
        })
    }

    /// Linear taper from `min_width` at a pad edge to `nominal` at `taper`.
    pub fn width_at(&self, p: Point<f64>) -> f64 {
        let d = self
            .pads
            .iter()
            .map(|r| r.distance_to(p))
            .fold(f64::INFINITY, f64::min);
        let t = if self.taper <= 0.0 {
            if d > 0.0 { 1.0 } else { 0.0 }
        } else {
            (d / self.taper).clamp(0.0, 1.0)
        };
        self.min_width + (self.nominal - self.min_width) * t
    }
}

/// Width steps the halo is quantised to inside a taper.
const NECK_LEVELS: usize = 8;

#[derive(Clone, Debug)]
struct WidthLevel {
    halo: Vec<(i32, i32)>,
    claim: u32,
}

/// Clearance geometry of one net's copper, in cells.
#[derive(Clone, Debug)]
pub struct ClearanceModel {
    levels: Vec<WidthLevel>,
    neck: Option<NeckDown>,
    via_halo: Vec<(i32, i32)>,
    via_claim: u32,
    /// Cells from the grid border a via centre must keep.
    via_edge_margin: u32,
}

impl ClearanceModel {
    pub fn new(rules: &DesignRules, resolution: f64, neck: Option<NeckDown>) -> Self {
        let level_for = |width: f64| WidthLevel {
            halo: disc(halo_radius(width / 2.0 + rules.clearance, resolution)),
            claim: claim_radius(width + rules.clearance, resolution),
        };
        let levels = match &neck {
            Some(nd) => (0..=NECK_LEVELS)
                .map(|i| {
                    level_for(
                        nd.min_width + (nd.nominal - nd.min_width) * i as f64 / NECK_LEVELS as f64,
                    )
                })
                .collect(),
            None => vec![level_for(rules.trace_width)],
        };
        let via_edge_margin = if rules.edge_clearance > 0.0 {
            ((rules.edge_clearance + rules.via_diameter / 2.0) / resolution - 1e-9).ceil() as u32
        } else {
            0
        };
        Self {
            levels,
            neck,
            via_halo: disc(halo_radius(
                rules.via_diameter / 2.0 + rules.clearance,
                resolution,
            )),
            via_claim: claim_radius(rules.via_diameter + rules.clearance, resolution),
            via_edge_margin,
        }
    }

    pub fn neck(&self) -> Option<&NeckDown> {
        self.neck.as_ref()
    }

    /// Smallest level whose width is at least the local trace width.
    #[inline]
    fn level(&self, conv: &GridConverter, c: GridCoord) -> &WidthLevel {
        match &self.neck {
            None => &self.levels[0],
            Some(nd) => {
                let w = nd.width_at(conv.to_world(c));
                let span = nd.nominal - nd.min_width;
                if span <= 0.0 {
                    return &self.levels[NECK_LEVELS];
                }
                let t = ((w - nd.min_width) / span * NECK_LEVELS as f64 - 1e-9).ceil();
                &self.levels[(t.max(0.0) as usize).min(NECK_LEVELS)]
            }
        }
    }

    /// Exact trace width at `p`.
    pub fn width_at(&self, p: Point<f64>, nominal: f64) -> f64 {
        self.neck.as_ref().map_or(nominal, |nd| nd.width_at(p))
    }

    #[inline]
    pub fn trace_halo(&self, conv: &GridConverter, c: GridCoord) -> &[(i32, i32)] {
        &self.level(conv, c).halo
    }

    #[inline]
    pub fn claim_radius(&self, conv: &GridConverter, c: GridCoord) -> u32 {
        self.level(conv, c).claim
    }

    /// Halo of a full-width trace.
    pub fn nominal_halo(&self) -> &[(i32, i32)] {
        match self.levels.last() {
            Some(level) => &level.halo,
            None => &[],
        }
    }

    /// Claim radius of a full-width trace.
    pub fn nominal_claim(&self) -> u32 {
        self.levels.last().map_or(0, |l| l.claim)
    }

    /// Farthest cell, in Chebyshev distance, any check or claim of this
    /// net's copper looks at.
    pub fn reach(&self) -> u32 {
        let halo_reach = |h: &[(i32, i32)]| {
            h.iter()
                .map(|(dx, dy)| dx.unsigned_abs().max(dy.unsigned_abs()))
                .max()
                .unwrap_or(0)
        };
        self.levels
            .iter()
            .map(|l| halo_reach(&l.halo).max(l.claim))
            .chain([halo_reach(&self.via_halo), self.via_claim])
            .max()
            .unwrap_or(0)
    }

    pub fn via_halo(&self) -> &[(i32, i32)] {
        &self.via_halo
    }

    pub fn via_claim(&self) -> u32 {
        self.via_claim
    }

    pub fn via_fits_board<G: RoutingGrid + ?Sized>(&self, grid: &G, x: u32, y: u32) -> bool {
        let m = self.via_edge_margin;
        x >= m && y >= m && x + m < grid.width() && y + m < grid.height()
    }

    /// Highest congestion cost a via at `(x, y)` would touch on any layer.
    pub fn via_footprint_cost<G: RoutingGrid + ?Sized>(&self, grid: &G, x: u32, y: u32) -> f64 {
        (0..grid.layers())
            .map(|z| grid.footprint_cost(GridCoord::new(x, y, z), self.via_claim))
            .fold(1.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_never_exceeds_a_straight_run() {
        let m = CostModel::new(&CostWeights::default());
        let a = GridCoord::new(0, 0, 0);
        let b = GridCoord::new(10, 0, 0);
        assert!(m.heuristic(a, b, false) <= 10 * m.ortho);
        let d = GridCoord::new(7, 7, 0);
        assert!(m.heuristic(a, d, false) <= 7 * m.diag);
        assert_eq!(m.heuristic(a, a.with_layer(1), false), m.via);
        assert_eq!(m.heuristic(a, a.with_layer(1), true), 0);
    }

    #[test]
    fn neck_width_tapers_linearly() {
        let nd = NeckDown {
            pads: vec![Rect::from_center(Point::new(0.0, 0.0), 0.3, 0.3)],
            min_width: 0.1,
            nominal: 0.25,
            taper: 0.5,
        };
        assert!((nd.width_at(Point::new(0.0, 0.0)) - 0.1).abs() < 1e-12);
        assert!((nd.width_at(Point::new(0.15, 0.0)) - 0.1).abs() < 1e-12);
        assert!((nd.width_at(Point::new(0.4, 0.0)) - 0.175).abs() < 1e-12);
        assert!((nd.width_at(Point::new(0.65, 0.0)) - 0.25).abs() < 1e-12);
        assert!((nd.width_at(Point::new(3.0, 0.0)) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn narrow_levels_have_smaller_halos() {
        let rules = DesignRules::default();
        let nd = NeckDown {
            pads: vec![Rect::from_center(Point::new(1.0, 1.0), 0.3, 0.3)],
            min_width: 0.1,
            nominal: 0.25,
            taper: 0.5,
        };
        let conv = GridConverter::new(
            Rect::new(Point::new(0.0, 0.0), Point::new(5.0, 5.0)),
            0.1,
        );
        let m = ClearanceModel::new(&rules, 0.1, Some(nd));
        let at_pad = conv.to_grid(Point::new(1.0, 1.0), 0);
        let far = conv.to_grid(Point::new(4.0, 4.0), 0);
        assert!(m.trace_halo(&conv, at_pad).len() < m.trace_halo(&conv, far).len());
        assert!(m.claim_radius(&conv, at_pad) <= m.claim_radius(&conv, far));
    }

    #[test]
    fn reach_covers_the_via_halo() {
        let rules = DesignRules::default();
        let cl = ClearanceModel::new(&rules, 0.1, None);
        assert_eq!(cl.reach(), 6);
        assert_eq!(cl.nominal_claim(), claim_radius(0.45, 0.1));
    }
}
